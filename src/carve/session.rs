use std::collections::VecDeque;
use std::time::Duration;

use image::RgbaImage;
use tracing::{debug, info};

use super::{Axis, Dimensions};
use crate::error::CarveError;
use crate::events::TickInput;
use crate::gpu::timer::GpuTiming;

/// One seam removal: `size` is the valid sub-rectangle before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeamJob {
    pub axis: Axis,
    pub size: Dimensions,
}

/// The device side of carving. [`CarveSession`] owns the bookkeeping and
/// drives an engine through these calls only.
pub trait SeamEngine {
    /// Edge length of the backing storage.
    fn max_image_size(&self) -> u32;

    /// Copy a decoded sRGB image into the original storage.
    fn upload(&mut self, image: &RgbaImage) -> anyhow::Result<()>;

    /// Re-derive the linear working image of `size` from the last upload.
    fn reset(&mut self, size: Dimensions) -> anyhow::Result<()>;

    /// Remove one seam per job, in order, as a single submission. Holds at
    /// most one job per axis.
    fn carve(&mut self, jobs: &[SeamJob]) -> anyhow::Result<()>;

    /// Timings of earlier ticks that have become available. Never blocks.
    fn poll_timings(&mut self) -> Vec<GpuTiming>;

    /// Block until every submitted tick has been measured.
    fn finish_timings(&mut self) -> Vec<GpuTiming>;

    /// Blocking copy of the current image of `size` as sRGB bytes.
    fn read_back(&mut self, size: Dimensions) -> anyhow::Result<RgbaImage>;
}

/// Spread of the recent per-tick GPU times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySummary {
    pub min_ms: f32,
    pub max_ms: f32,
    pub last_ms: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CarveState {
    #[default]
    Idle,
    Carving,
}

/// Per-carve counters; cleared when a carve starts, on reset and on load.
#[derive(Debug, Clone, Default)]
pub struct CarveStats {
    pub vertical_seams: u32,
    pub horizontal_seams: u32,
    pub ticks: u32,
    pub wall_time: Duration,
    /// Sum of every measured tick.
    pub gpu_time: Duration,
    measured_seams: u32,
    history: VecDeque<f32>,
    history_capacity: usize,
}

impl CarveStats {
    fn new(history_capacity: usize) -> Self {
        Self {
            history_capacity,
            ..Self::default()
        }
    }

    fn clear(&mut self) {
        *self = Self::new(self.history_capacity);
    }

    fn record(&mut self, timing: GpuTiming) {
        self.gpu_time += timing.elapsed;
        self.measured_seams += timing.seams;
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history
            .push_back(timing.elapsed.as_secs_f32() * 1000.0);
    }

    pub fn seams(&self) -> u32 {
        self.vertical_seams + self.horizontal_seams
    }

    /// Mean GPU time per measured seam.
    pub fn average_seam_time(&self) -> Option<Duration> {
        (self.measured_seams > 0).then(|| self.gpu_time / self.measured_seams)
    }

    /// GPU time of recent ticks in milliseconds, oldest first.
    pub fn history_ms(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn history_summary(&self) -> Option<HistorySummary> {
        let last_ms = *self.history.back()?;
        let (min_ms, max_ms) = self
            .history
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &ms| {
                (lo.min(ms), hi.max(ms))
            });
        Some(HistorySummary {
            min_ms,
            max_ms,
            last_ms,
        })
    }
}

/// Outcome of one scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub vertical: bool,
    pub horizontal: bool,
    /// The carve reached its target during this tick.
    pub finished: bool,
}

#[derive(Debug, Clone, Copy)]
struct LoadedImage {
    original: Dimensions,
    current: Dimensions,
    target: Dimensions,
}

/// Carve orchestrator: owns the engine, the image geometry and the
/// `Idle`/`Carving` state machine.
pub struct CarveSession<E> {
    engine: E,
    image: Option<LoadedImage>,
    state: CarveState,
    stats: CarveStats,
    jobs: Vec<SeamJob>,
}

impl<E: SeamEngine> CarveSession<E> {
    pub fn new(engine: E, timing_history: usize) -> Self {
        Self {
            engine,
            image: None,
            state: CarveState::Idle,
            stats: CarveStats::new(timing_history),
            jobs: Vec::with_capacity(Axis::ALL.len()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn state(&self) -> CarveState {
        self.state
    }

    pub fn stats(&self) -> &CarveStats {
        &self.stats
    }

    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    pub fn original_size(&self) -> Option<Dimensions> {
        self.image.map(|image| image.original)
    }

    pub fn current_size(&self) -> Option<Dimensions> {
        self.image.map(|image| image.current)
    }

    pub fn target_size(&self) -> Option<Dimensions> {
        self.image.map(|image| image.target)
    }

    /// Replace the loaded image. A rejected image leaves the session exactly
    /// as it was.
    pub fn load(&mut self, image: &RgbaImage) -> Result<Dimensions, CarveError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CarveError::EmptyImage { width, height });
        }
        let max = self.engine.max_image_size();
        let size = Dimensions::new(width, height);
        if !size.fits_within(max) {
            return Err(CarveError::ImageTooLarge { width, height, max });
        }

        // Ticks of the previous image must not land in the new stats.
        self.engine.finish_timings();
        self.engine.upload(image).map_err(CarveError::Gpu)?;
        self.engine.reset(size).map_err(CarveError::Gpu)?;
        self.image = Some(LoadedImage {
            original: size,
            current: size,
            target: size,
        });
        self.state = CarveState::Idle;
        self.stats.clear();
        info!(%size, "image loaded");
        Ok(size)
    }

    /// Restore the original image and target and clear the counters.
    pub fn reset(&mut self) -> Result<(), CarveError> {
        let image = self.image.as_mut().ok_or(CarveError::NoImage)?;
        self.engine.finish_timings();
        self.engine.reset(image.original).map_err(CarveError::Gpu)?;
        image.current = image.original;
        image.target = image.original;
        self.state = CarveState::Idle;
        self.stats.clear();
        debug!(size = %image.original, "reset to original");
        Ok(())
    }

    /// Set the target, clamped to `1..=original` on each axis.
    pub fn set_target(&mut self, width: u32, height: u32) -> Result<Dimensions, CarveError> {
        let image = self.image.as_mut().ok_or(CarveError::NoImage)?;
        image.target = Dimensions::new(
            width.clamp(1, image.original.width),
            height.clamp(1, image.original.height),
        );
        Ok(image.target)
    }

    /// Move the target by a signed delta per axis.
    pub fn adjust_target(&mut self, width: i64, height: i64) -> Result<Dimensions, CarveError> {
        let target = self.target_size().ok_or(CarveError::NoImage)?;
        let shift = |value: u32, delta: i64| {
            (i64::from(value) + delta).clamp(1, i64::from(u32::MAX)) as u32
        };
        self.set_target(shift(target.width, width), shift(target.height, height))
    }

    /// Begin carving towards the target. A target larger than the current
    /// image on either axis needs the original pixels back, so the image is
    /// reset first. Does nothing while a carve is already running.
    pub fn start_carve(&mut self) -> Result<(), CarveError> {
        let image = self.image.as_mut().ok_or(CarveError::NoImage)?;
        if self.state == CarveState::Carving {
            debug!(to = %image.target, "carve already running");
            return Ok(());
        }
        if image.target.width > image.current.width || image.target.height > image.current.height
        {
            self.engine.reset(image.original).map_err(CarveError::Gpu)?;
            image.current = image.original;
            debug!(size = %image.original, "reset before enlarging");
        }
        if image.current == image.target {
            return Ok(());
        }
        self.stats.clear();
        self.state = CarveState::Carving;
        info!(from = %image.current, to = %image.target, "carving");
        Ok(())
    }

    /// One scheduling step: at most one vertical and one horizontal seam.
    pub fn tick(&mut self, input: TickInput) -> Result<TickReport, CarveError> {
        for timing in self.engine.poll_timings() {
            self.stats.record(timing);
        }

        let mut report = TickReport::default();
        if self.state != CarveState::Carving {
            return Ok(report);
        }
        let Some(image) = self.image.as_mut() else {
            self.state = CarveState::Idle;
            return Ok(report);
        };

        self.jobs.clear();
        let mut size = image.current;
        if size.width > image.target.width {
            self.jobs.push(SeamJob {
                axis: Axis::Vertical,
                size,
            });
            size = Axis::Vertical.shrink(size);
        }
        if size.height > image.target.height {
            self.jobs.push(SeamJob {
                axis: Axis::Horizontal,
                size,
            });
            size = Axis::Horizontal.shrink(size);
        }

        if !self.jobs.is_empty() {
            self.engine.carve(&self.jobs).map_err(CarveError::Gpu)?;
            image.current = size;
            for job in &self.jobs {
                match job.axis {
                    Axis::Vertical => {
                        report.vertical = true;
                        self.stats.vertical_seams += 1;
                    }
                    Axis::Horizontal => {
                        report.horizontal = true;
                        self.stats.horizontal_seams += 1;
                    }
                }
            }
            self.stats.ticks += 1;
            self.stats.wall_time += input.elapsed;
        }

        if image.current.width <= image.target.width && image.current.height <= image.target.height
        {
            self.state = CarveState::Idle;
            report.finished = true;
            for timing in self.engine.finish_timings() {
                self.stats.record(timing);
            }
            info!(
                size = %image.current,
                seams = self.stats.seams(),
                gpu_ms = self.stats.gpu_time.as_secs_f64() * 1000.0,
                "carve finished"
            );
            if let Some(history) = self.stats.history_summary() {
                debug!(
                    ticks = self.stats.history.len(),
                    min_ms = history.min_ms,
                    max_ms = history.max_ms,
                    last_ms = history.last_ms,
                    "tick gpu times"
                );
            }
        }
        Ok(report)
    }

    /// Run ticks until the carve finishes.
    pub fn carve_to_target(&mut self) -> Result<(), CarveError> {
        self.start_carve()?;
        while self.state == CarveState::Carving {
            self.tick(TickInput::default())?;
        }
        Ok(())
    }

    /// Blocking copy of the current image, for export.
    pub fn snapshot(&mut self) -> Result<RgbaImage, CarveError> {
        let size = self.current_size().ok_or(CarveError::NoImage)?;
        self.engine.read_back(size).map_err(CarveError::Gpu)
    }
}
