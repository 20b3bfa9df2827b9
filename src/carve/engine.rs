use std::sync::Arc;

use anyhow::{Result, ensure};
use image::RgbaImage;
use tracing::{debug, trace};

use super::pipeline::{encode_energy, encode_prepare, encode_seam, write_job_params, write_prepare_params};
use super::resources::CarveResources;
use super::session::{SeamEngine, SeamJob};
use super::{Axis, Dimensions};
use crate::export::linear_to_srgb_in_place;
use crate::gpu::GpuContext;
use crate::gpu::kernels::Kernels;
use crate::gpu::timer::{GpuTimer, GpuTiming};

/// Seam engine running every stage as wgpu compute passes.
pub struct GpuSeamEngine {
    pub(super) gpu: Arc<GpuContext>,
    pub(super) kernels: Kernels,
    pub(super) resources: CarveResources,
    timer: Option<GpuTimer>,
    pub(super) params_scratch: Vec<u8>,
    last_axis: Option<Axis>,
    /// Size the energy texture was last computed for. `None` once a seam
    /// removal or an injected map has made it stale.
    pub(super) energy_size: Option<Dimensions>,
}

impl GpuSeamEngine {
    /// Compile the kernels and allocate storage for `max × max` images.
    pub fn new(gpu: Arc<GpuContext>, max: u32, gpu_timing: bool) -> Result<Self> {
        let kernels = Kernels::new(&gpu)?;
        let resources = CarveResources::new(&gpu, &kernels, max)?;
        let timer = match (gpu_timing, gpu.supports_timestamps()) {
            (true, true) => GpuTimer::new(&gpu.device, &gpu.queue),
            (true, false) => {
                debug!("adapter lacks timestamp queries; gpu timing disabled");
                None
            }
            (false, _) => None,
        };
        Ok(Self {
            gpu,
            kernels,
            resources,
            timer,
            params_scratch: Vec::new(),
            last_axis: None,
            energy_size: None,
        })
    }

    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    pub fn timing_enabled(&self) -> bool {
        self.timer.is_some()
    }

    /// Both halves of the ping/pong pair.
    pub fn working_views(&self) -> &[wgpu::TextureView; 2] {
        &self.resources.image_views
    }

    /// Index into [`Self::working_views`] of the current image.
    pub fn source_index(&self) -> usize {
        self.resources.source
    }

    pub fn energy_view(&self) -> &wgpu::TextureView {
        &self.resources.energy_view
    }

    pub fn seam_buffer(&self) -> &wgpu::Buffer {
        &self.resources.seam
    }

    /// Axis of the seam currently held in the seam buffer.
    pub fn last_axis(&self) -> Option<Axis> {
        self.last_axis
    }

    /// Recompute the energy map only when it no longer describes the
    /// current image of `size`.
    pub fn sync_energy(&mut self, size: Dimensions) {
        if self.energy_size != Some(size) {
            self.refresh_energy(size);
        }
    }

    /// Recompute the energy map of the current image.
    pub fn refresh_energy(&mut self, size: Dimensions) {
        write_prepare_params(&self.gpu.queue, &self.resources, size);
        let mut encoder = self.encoder("refresh-energy");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("refresh-energy"),
                timestamp_writes: None,
            });
            encode_energy(
                &mut pass,
                &self.kernels,
                &self.resources,
                self.resources.prepare_offset(),
                size,
                self.resources.source,
            );
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        self.energy_size = Some(size);
    }

    /// Blocking read of the energy map of the current image, row-major,
    /// `size.pixel_count()` values.
    pub fn energy_map(&mut self, size: Dimensions) -> Result<Vec<f32>> {
        self.sync_energy(size);
        let bytes = self.gpu.read_texture(&self.resources.energy, size, 4)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Blocking read of the current image as linear RGBA8, without the sRGB
    /// encode applied by [`SeamEngine::read_back`].
    pub fn linear_pixels(&self, size: Dimensions) -> Result<Vec<u8>> {
        self.gpu
            .read_texture(&self.resources.images[self.resources.source], size, 4)
    }

    pub(super) fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn clear_seam(&self) {
        // -1 never matches a pixel coordinate, so the overlay stays empty.
        let fill = vec![0xff_u8; self.resources.seam.size() as usize];
        self.gpu.queue.write_buffer(&self.resources.seam, 0, &fill);
    }
}

impl SeamEngine for GpuSeamEngine {
    fn max_image_size(&self) -> u32 {
        self.resources.max
    }

    fn upload(&mut self, image: &RgbaImage) -> Result<()> {
        let (width, height) = image.dimensions();
        ensure!(
            Dimensions::new(width, height).fits_within(self.resources.max),
            "upload of {width}x{height} exceeds storage of {}",
            self.resources.full_extent()
        );
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.resources.original,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        debug!(width, height, "uploaded original");
        Ok(())
    }

    fn reset(&mut self, size: Dimensions) -> Result<()> {
        write_prepare_params(&self.gpu.queue, &self.resources, size);
        self.clear_seam();
        self.resources.source = 0;
        self.last_axis = None;
        self.energy_size = Some(size);

        let mut encoder = self.encoder("reset");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("reset"),
                timestamp_writes: None,
            });
            encode_prepare(&mut pass, &self.kernels, &self.resources, size);
            encode_energy(
                &mut pass,
                &self.kernels,
                &self.resources,
                self.resources.prepare_offset(),
                size,
                0,
            );
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn carve(&mut self, jobs: &[SeamJob]) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        ensure!(
            jobs.len() <= Axis::ALL.len()
                && jobs
                    .iter()
                    .enumerate()
                    .all(|(i, job)| jobs[..i].iter().all(|other| other.axis != job.axis)),
            "a tick removes at most one seam per axis"
        );
        for job in jobs {
            ensure!(
                job.size.fits_within(self.resources.max)
                    && job.axis.line_extent(job.size) > 1
                    && job.axis.line_count(job.size) > 0,
                "cannot carve a {:?} seam from {}",
                job.axis,
                job.size
            );
            write_job_params(
                &self.gpu.queue,
                &self.resources,
                job.axis,
                job.size,
                &mut self.params_scratch,
            );
        }

        let slot = self
            .timer
            .as_mut()
            .and_then(|timer| timer.begin(jobs.len() as u32));
        let mut encoder = self.encoder("carve-tick");
        {
            let timestamp_writes = slot.and_then(|slot| {
                self.timer
                    .as_ref()
                    .map(|timer| timer.pass_writes(slot))
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("carve-tick"),
                timestamp_writes,
            });
            for &job in jobs {
                encode_seam(&mut pass, &self.kernels, &self.resources, job);
                self.resources.swap();
            }
        }
        if let (Some(slot), Some(timer)) = (slot, self.timer.as_ref()) {
            timer.resolve(&mut encoder, slot);
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        if let (Some(slot), Some(timer)) = (slot, self.timer.as_mut()) {
            timer.submitted(slot);
        }

        self.last_axis = jobs.last().map(|job| job.axis);
        // Energy was computed before the last removal.
        self.energy_size = None;
        trace!(seams = jobs.len(), source = self.resources.source, "tick submitted");
        Ok(())
    }

    fn poll_timings(&mut self) -> Vec<GpuTiming> {
        match self.timer.as_mut() {
            Some(timer) => timer.collect(&self.gpu.device, false),
            None => Vec::new(),
        }
    }

    fn finish_timings(&mut self) -> Vec<GpuTiming> {
        match self.timer.as_mut() {
            Some(timer) => timer.collect(&self.gpu.device, true),
            None => Vec::new(),
        }
    }

    fn read_back(&mut self, size: Dimensions) -> Result<RgbaImage> {
        let mut pixels = self.linear_pixels(size)?;
        linear_to_srgb_in_place(&mut pixels);
        RgbaImage::from_raw(size.width, size.height, pixels)
            .ok_or_else(|| anyhow::anyhow!("read back {} bytes short of {size}", size.pixel_count() * 4))
    }
}
