use std::num::NonZeroU64;

use anyhow::{Result, ensure};
use tracing::debug;

use super::{Axis, Dimensions, LINE_WORKGROUP_SIZE, workgroups};
use crate::gpu::GpuContext;
use crate::gpu::kernels::{
    CARVE_PARAMS_SIZE, ENERGY_FORMAT, Kernels, ORIGINAL_FORMAT, WORKING_FORMAT,
};

/// Every texture and buffer of the seam pipeline, sized once for a
/// `max × max` image and reused for every seam and every load.
pub(crate) struct CarveResources {
    pub max: u32,

    pub original: wgpu::Texture,
    pub images: [wgpu::Texture; 2],
    pub image_views: [wgpu::TextureView; 2],
    pub energy: wgpu::Texture,
    pub energy_view: wgpu::TextureView,
    pub cost_map: wgpu::Buffer,
    pub min_indices: wgpu::Buffer,
    pub seam: wgpu::Buffer,

    pub params: wgpu::Buffer,
    pub params_stride: u64,
    pub params_group: wgpu::BindGroup,

    pub prepare_group: wgpu::BindGroup,
    /// Indexed by the current source image.
    pub energy_groups: [wgpu::BindGroup; 2],
    pub cost_group: wgpu::BindGroup,
    pub reduce_group: wgpu::BindGroup,
    pub backtrace_group: wgpu::BindGroup,
    /// Indexed by the current source image; writes the other one.
    pub remove_groups: [wgpu::BindGroup; 2],

    /// Which of `images` holds the current valid sub-rectangle.
    pub source: usize,
}

impl CarveResources {
    pub fn new(gpu: &GpuContext, kernels: &Kernels, max: u32) -> Result<Self> {
        let limits = gpu.device.limits();
        ensure!(
            max <= gpu.max_texture_size(),
            "max-image-size {max} exceeds the adapter texture limit {}",
            gpu.max_texture_size()
        );
        let cost_bytes = u64::from(max) * u64::from(max) * 4;
        ensure!(
            cost_bytes <= u64::from(limits.max_storage_buffer_binding_size)
                && cost_bytes <= limits.max_buffer_size,
            "max-image-size {max} needs a {cost_bytes}-byte cost map; adapter allows {}",
            limits.max_storage_buffer_binding_size
        );

        let resources = gpu.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            "allocate seam carving resources",
            || {
                gpu.scoped(
                    wgpu::ErrorFilter::Validation,
                    "create seam carving resources",
                    || Self::build(&gpu.device, kernels, max),
                )
            },
        )??;
        debug!(
            max,
            params_stride = resources.params_stride,
            "seam carving resources allocated"
        );
        Ok(resources)
    }

    fn build(device: &wgpu::Device, kernels: &Kernels, max: u32) -> Self {
        let extent = wgpu::Extent3d {
            width: max,
            height: max,
            depth_or_array_layers: 1,
        };
        let texture = |label: &str, format, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let working_usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_SRC;

        let original = texture(
            "original-srgb",
            ORIGINAL_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let images = [
            texture("image-ping", WORKING_FORMAT, working_usage),
            texture("image-pong", WORKING_FORMAT, working_usage),
        ];
        let energy = texture(
            "energy",
            ENERGY_FORMAT,
            working_usage | wgpu::TextureUsages::COPY_DST,
        );

        let original_view = original.create_view(&wgpu::TextureViewDescriptor::default());
        let image_views = [
            images[0].create_view(&wgpu::TextureViewDescriptor::default()),
            images[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];
        let energy_view = energy.create_view(&wgpu::TextureViewDescriptor::default());

        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let cost_map = storage("cost-map", u64::from(max) * u64::from(max) * 4);
        let min_indices = storage(
            "min-indices",
            u64::from(workgroups(max, LINE_WORKGROUP_SIZE)) * 8,
        );
        let seam = storage("seam", u64::from(max) * 4);

        let params_stride = params_stride(
            device.limits().min_uniform_buffer_offset_alignment,
        );
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("carve-params"),
            size: params_stride * u64::from(param_slot_count(max)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("carve-params"),
            layout: &kernels.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &params,
                    offset: 0,
                    size: NonZeroU64::new(CARVE_PARAMS_SIZE),
                }),
            }],
        });

        let group = |label: &str, layout, entries: &[wgpu::BindGroupEntry<'_>]| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries,
            })
        };
        let view = |binding, view| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        };
        let buffer = |binding, buffer| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::Buffer::as_entire_binding(buffer),
        };

        let prepare_group = group(
            "prepare",
            &kernels.prepare_layout,
            &[view(0, &original_view), view(1, &image_views[0])],
        );
        let energy_groups = [0, 1].map(|source| {
            group(
                "energy",
                &kernels.energy_layout,
                &[view(0, &image_views[source]), view(1, &energy_view)],
            )
        });
        let cost_group = group(
            "cost",
            &kernels.cost_layout,
            &[view(0, &energy_view), buffer(1, &cost_map)],
        );
        let reduce_group = group(
            "reduce",
            &kernels.reduce_layout,
            &[buffer(0, &cost_map), buffer(1, &min_indices)],
        );
        let backtrace_group = group(
            "backtrace",
            &kernels.backtrace_layout,
            &[
                buffer(0, &cost_map),
                buffer(1, &min_indices),
                buffer(2, &seam),
            ],
        );
        let remove_groups = [0, 1].map(|source| {
            group(
                "remove",
                &kernels.remove_layout,
                &[
                    view(0, &image_views[source]),
                    view(1, &image_views[1 - source]),
                    buffer(2, &seam),
                ],
            )
        });

        Self {
            max,
            original,
            images,
            image_views,
            energy,
            energy_view,
            cost_map,
            min_indices,
            seam,
            params,
            params_stride,
            params_group,
            prepare_group,
            energy_groups,
            cost_group,
            reduce_group,
            backtrace_group,
            remove_groups,
            source: 0,
        }
    }

    pub fn full_extent(&self) -> Dimensions {
        Dimensions::new(self.max, self.max)
    }

    /// Dynamic offset of the params slot for `line` of `axis`.
    pub fn line_offset(&self, axis: Axis, line: u32) -> u32 {
        (u64::from(line_slot(self.max, axis, line)) * self.params_stride) as u32
    }

    /// Dynamic offset of the slot used by the reset pass.
    pub fn prepare_offset(&self) -> u32 {
        (u64::from(prepare_slot(self.max)) * self.params_stride) as u32
    }

    pub fn swap(&mut self) {
        self.source = 1 - self.source;
    }
}

pub(crate) fn params_stride(min_alignment: u32) -> u64 {
    CARVE_PARAMS_SIZE.next_multiple_of(u64::from(min_alignment))
}

/// One slot per (axis, line) plus the trailing reset slot.
pub(crate) fn param_slot_count(max: u32) -> u32 {
    2 * max + 1
}

pub(crate) fn line_slot(max: u32, axis: Axis, line: u32) -> u32 {
    axis.as_u32() * max + line
}

pub(crate) fn prepare_slot(max: u32) -> u32 {
    2 * max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_device_alignment() {
        assert_eq!(params_stride(256), 256);
        assert_eq!(params_stride(64), 64);
        assert_eq!(params_stride(16), 32);
    }

    #[test]
    fn slots_never_overlap() {
        let max = 5;
        let mut seen: Vec<u32> = Axis::ALL
            .iter()
            .flat_map(|&axis| (0..max).map(move |line| line_slot(max, axis, line)))
            .collect();
        seen.push(prepare_slot(max));
        let count = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), count);
        assert!(seen.iter().all(|&slot| slot < param_slot_count(max)));
    }
}
