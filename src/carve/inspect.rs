//! Diagnostics: run the trace stages on an injected energy map and read every
//! intermediate back.

use anyhow::{Result, ensure};

use super::pipeline::{encode_trace, write_job_params};
use super::{Axis, Dimensions, GpuSeamEngine, MinIndexRecord};

/// Cost map, cheapest endpoint and seam of one traced energy map.
#[derive(Debug, Clone, PartialEq)]
pub struct SeamTrace {
    pub axis: Axis,
    pub size: Dimensions,
    /// Row-major, `size.width` entries per row for both axes.
    pub cost_map: Vec<f32>,
    pub endpoint: MinIndexRecord,
    /// One coordinate per line, line 0 first.
    pub seam: Vec<i32>,
}

impl SeamTrace {
    pub fn cost(&self, x: u32, y: u32) -> f32 {
        self.cost_map[(y * self.size.width + x) as usize]
    }

    /// Seam coordinates on adjacent lines differ by at most one.
    pub fn is_connected(&self) -> bool {
        self.seam.windows(2).all(|pair| (pair[0] - pair[1]).abs() <= 1)
    }
}

impl GpuSeamEngine {
    /// Upload `energy` (row-major, `size.pixel_count()` values) in place of
    /// the computed energy map and run cost, reduction and backtrace on it.
    pub fn trace_energy(&mut self, axis: Axis, size: Dimensions, energy: &[f32]) -> Result<SeamTrace> {
        ensure!(
            energy.len() == size.pixel_count(),
            "energy map has {} values, expected {} for {size}",
            energy.len(),
            size.pixel_count()
        );
        ensure!(
            size.pixel_count() > 0 && size.fits_within(self.resources.max),
            "cannot trace a {size} energy map"
        );

        self.gpu.queue.write_texture(
            self.resources.energy.as_image_copy(),
            bytemuck::cast_slice(energy),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.energy_size = None;
        write_job_params(
            &self.gpu.queue,
            &self.resources,
            axis,
            size,
            &mut self.params_scratch,
        );

        let mut encoder = self.encoder("trace-energy");
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("trace-energy"),
                timestamp_writes: None,
            });
            encode_trace(&mut pass, &self.kernels, &self.resources, axis, size);
        }
        self.gpu.queue.submit(Some(encoder.finish()));

        let cost_bytes = self.gpu.read_buffer(
            &self.resources.cost_map,
            0,
            size.pixel_count() as u64 * 4,
        )?;
        let endpoint_bytes = self.gpu.read_buffer(&self.resources.min_indices, 0, 8)?;
        let seam_bytes = self.gpu.read_buffer(
            &self.resources.seam,
            0,
            u64::from(axis.line_count(size)) * 4,
        )?;

        let endpoint: [u32; 2] = bytemuck::pod_read_unaligned(&endpoint_bytes);
        Ok(SeamTrace {
            axis,
            size,
            cost_map: bytemuck::pod_collect_to_vec(&cost_bytes),
            endpoint: MinIndexRecord::decode(endpoint),
            seam: bytemuck::pod_collect_to_vec(&seam_bytes),
        })
    }
}
