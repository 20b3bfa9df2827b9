//! wgpu device acquisition and the blocking transfer helpers shared by
//! upload, export and diagnostics.

pub mod kernels;
pub mod timer;

use std::sync::mpsc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::carve::Dimensions;

pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire a device with no presentation surface (batch carving, tests).
    pub fn headless() -> Result<Self> {
        Self::new(wgpu::Instance::default(), None)
    }

    /// Acquire a device able to present to `surface` when one is given.
    pub fn new(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .context("request wgpu adapter")?;
        let adapter_info = adapter.get_info();
        let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("seam-carver-device"),
            required_features,
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("request wgpu device")?;
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            timestamps = required_features.contains(wgpu::Features::TIMESTAMP_QUERY),
            "gpu device ready"
        );
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn supports_timestamps(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    pub fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Run `f` inside a wgpu error scope and turn a captured error into a
    /// hard failure.
    pub fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        what: &str,
        f: impl FnOnce() -> T,
    ) -> Result<T> {
        self.device.push_error_scope(filter);
        let value = f();
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("{what}: {err}");
        }
        Ok(value)
    }

    /// Copy `size` bytes of `source` starting at `offset` back to the host.
    /// Blocks until the GPU has drained all prior work.
    pub fn read_buffer(&self, source: &wgpu::Buffer, offset: u64, size: u64) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback-buffer"),
            });
        encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));
        self.map_blocking(&staging)
    }

    /// Copy the leading `size` sub-rectangle of `texture` back to the host
    /// as tightly packed rows of `bytes_per_pixel`.
    pub fn read_texture(
        &self,
        texture: &wgpu::Texture,
        size: Dimensions,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>> {
        if size.pixel_count() == 0 {
            return Ok(Vec::new());
        }
        let row_bytes = size.width * bytes_per_pixel;
        let padded = padded_bytes_per_row(row_bytes);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-texture-staging"),
            size: u64::from(padded) * u64::from(size.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback-texture"),
            });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        let padded_rows = self.map_blocking(&staging)?;
        Ok(strip_row_padding(&padded_rows, row_bytes, padded))
    }

    fn map_blocking(&self, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        receiver
            .recv()
            .context("receive map result")?
            .context("map buffer for read")?;
        let data = slice.get_mapped_range();
        let out = data.to_vec();
        drop(data);
        staging.unmap();
        debug!(bytes = out.len(), "read back gpu data");
        Ok(out)
    }
}

/// Row pitch for texture/buffer copies, rounded up to wgpu's 256-byte
/// alignment.
pub fn padded_bytes_per_row(row_bytes: u32) -> u32 {
    row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Drop the per-row padding of a copied texture.
pub fn strip_row_padding(padded: &[u8], row_bytes: u32, padded_row_bytes: u32) -> Vec<u8> {
    if row_bytes == padded_row_bytes {
        return padded.to_vec();
    }
    padded
        .chunks(padded_row_bytes as usize)
        .flat_map(|row| &row[..row_bytes as usize])
        .copied()
        .collect()
}
