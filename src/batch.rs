//! Headless carving of a single file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::GrayImage;
use tracing::{info, warn};

use crate::carve::{CarveSession, Dimensions, GpuSeamEngine};
use crate::config::Configuration;
use crate::export;
use crate::gpu::GpuContext;
use crate::loader;

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input: PathBuf,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
    /// Also write the final energy map as a greyscale image.
    pub dump_energy: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub original: Dimensions,
    pub carved: Dimensions,
    pub seams: u32,
    pub gpu_time: Duration,
    pub wall_time: Duration,
}

pub fn run_batch(cfg: &Configuration, request: &BatchRequest) -> Result<BatchSummary> {
    let started = Instant::now();
    let decoded = loader::decode(&request.input)?;

    let gpu = Arc::new(GpuContext::headless()?);
    let engine = GpuSeamEngine::new(gpu, cfg.max_image_size, cfg.gpu_timing)
        .context("failed to initialise seam engine")?;
    let mut session = CarveSession::new(engine, cfg.timing_history_capacity());

    let original = session.load(&decoded.image)?;
    let target = session.set_target(request.width, request.height)?;
    if target != Dimensions::new(request.width, request.height) {
        warn!(requested = %Dimensions::new(request.width, request.height), %target, "target clamped");
    }
    session.carve_to_target()?;

    let carved = session.snapshot()?;
    export::save(&carved, &request.output, cfg.jpeg_quality)?;

    let size = Dimensions::new(carved.width(), carved.height());
    if let Some(path) = &request.dump_energy {
        let energy = session.engine_mut().energy_map(size)?;
        let gray = energy_to_gray(&energy, size, cfg.energy_display_scale);
        gray.save(path)
            .with_context(|| format!("failed to write energy map {}", path.display()))?;
        info!(path = %path.display(), "energy map written");
    }

    let stats = session.stats();
    let summary = BatchSummary {
        original,
        carved: size,
        seams: stats.seams(),
        gpu_time: stats.gpu_time,
        wall_time: started.elapsed(),
    };
    info!(
        from = %summary.original,
        to = %summary.carved,
        seams = summary.seams,
        gpu_ms = summary.gpu_time.as_secs_f64() * 1000.0,
        wall_ms = summary.wall_time.as_secs_f64() * 1000.0,
        "batch carve complete"
    );
    Ok(summary)
}

/// Map energy to 8-bit grey with the display scale, saturating at white.
pub fn energy_to_gray(energy: &[f32], size: Dimensions, scale: f32) -> GrayImage {
    GrayImage::from_fn(size.width, size.height, |x, y| {
        let e = energy[(y * size.width + x) as usize];
        image::Luma([((e * scale).clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}
