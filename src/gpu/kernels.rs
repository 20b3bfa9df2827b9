//! Compute pipelines of the seam pipeline and their bind group layouts.
//!
//! Every kernel binds the per-dispatch [`CarveParams`] slot at group 0 (with
//! a dynamic offset) and its stage resources at group 1.

use std::num::NonZeroU64;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use super::GpuContext;

/// Uniform block shared by every compute kernel; matches `CarveParams` in
/// the WGSL sources.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CarveParams {
    pub current_size: [u32; 2],
    pub texture_size: [u32; 2],
    pub line: u32,
    pub axis: u32,
    pub _pad: [u32; 2],
}

pub const CARVE_PARAMS_SIZE: u64 = std::mem::size_of::<CarveParams>() as u64;

pub const ENERGY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const WORKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const ORIGINAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

pub struct Kernels {
    pub params_layout: wgpu::BindGroupLayout,

    pub prepare_layout: wgpu::BindGroupLayout,
    pub prepare: wgpu::ComputePipeline,

    pub energy_layout: wgpu::BindGroupLayout,
    pub energy: wgpu::ComputePipeline,

    pub cost_layout: wgpu::BindGroupLayout,
    pub cost: wgpu::ComputePipeline,

    pub reduce_layout: wgpu::BindGroupLayout,
    pub find_min_local: wgpu::ComputePipeline,
    pub find_min_global: wgpu::ComputePipeline,

    pub backtrace_layout: wgpu::BindGroupLayout,
    pub backtrace: wgpu::ComputePipeline,

    pub remove_layout: wgpu::BindGroupLayout,
    pub remove: wgpu::ComputePipeline,
}

impl Kernels {
    /// Compile every kernel. A WGSL or layout validation error is fatal.
    pub fn new(gpu: &GpuContext) -> Result<Self> {
        gpu.scoped(
            wgpu::ErrorFilter::Validation,
            "compile seam carving kernels",
            || Self::build(&gpu.device),
        )
    }

    fn build(device: &wgpu::Device) -> Self {
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("carve-params-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(CARVE_PARAMS_SIZE),
                },
                count: None,
            }],
        });

        let prepare_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prepare-layout"),
            entries: &[
                sampled_texture(0, true),
                storage_texture(1, WORKING_FORMAT),
            ],
        });
        let energy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("energy-layout"),
            entries: &[sampled_texture(0, true), storage_texture(1, ENERGY_FORMAT)],
        });
        let cost_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cost-layout"),
            entries: &[sampled_texture(0, false), storage_buffer(1, false)],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reduce-layout"),
            entries: &[storage_buffer(0, true), storage_buffer(1, false)],
        });
        let backtrace_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("backtrace-layout"),
            entries: &[
                storage_buffer(0, true),
                storage_buffer(1, true),
                storage_buffer(2, false),
            ],
        });
        let remove_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("remove-layout"),
            entries: &[
                sampled_texture(0, true),
                storage_texture(1, WORKING_FORMAT),
                storage_buffer(2, true),
            ],
        });

        let prepare_module = shader(device, "prepare", include_str!("shaders/prepare.wgsl"));
        let energy_module = shader(device, "energy", include_str!("shaders/energy.wgsl"));
        let cost_module = shader(device, "cost", include_str!("shaders/cost.wgsl"));
        let reduce_module = shader(device, "reduce", include_str!("shaders/reduce.wgsl"));
        let backtrace_module = shader(device, "backtrace", include_str!("shaders/backtrace.wgsl"));
        let remove_module = shader(device, "remove", include_str!("shaders/remove.wgsl"));

        let stage = |label: &str, module: &wgpu::ShaderModule, entry: &str, layout| {
            compute_pipeline(device, label, module, entry, &[&params_layout, layout])
        };
        let prepare = stage("prepare", &prepare_module, "main", &prepare_layout);
        let energy = stage("energy", &energy_module, "main", &energy_layout);
        let cost = stage("cost", &cost_module, "main", &cost_layout);
        let find_min_local = stage(
            "find-min-local",
            &reduce_module,
            "find_min_local",
            &reduce_layout,
        );
        let find_min_global = stage(
            "find-min-global",
            &reduce_module,
            "find_min_global",
            &reduce_layout,
        );
        let backtrace = stage("backtrace", &backtrace_module, "main", &backtrace_layout);
        let remove = stage("remove", &remove_module, "main", &remove_layout);

        Self {
            params_layout,
            prepare_layout,
            prepare,
            energy_layout,
            energy,
            cost_layout,
            cost,
            reduce_layout,
            find_min_local,
            find_min_global,
            backtrace_layout,
            backtrace,
            remove_layout,
            remove,
        }
    }
}

fn shader(device: &wgpu::Device, label: &str, source: &'static str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

pub(crate) fn sampled_texture(binding: u32, filterable: bool) -> wgpu::BindGroupLayoutEntry {
    sampled_texture_in(binding, filterable, wgpu::ShaderStages::COMPUTE)
}

pub(crate) fn sampled_texture_in(
    binding: u32,
    filterable: bool,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture(binding: u32, format: wgpu::TextureFormat) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn storage_buffer(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    storage_buffer_in(binding, read_only, wgpu::ShaderStages::COMPUTE)
}

pub(crate) fn storage_buffer_in(
    binding: u32,
    read_only: bool,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_block_matches_wgsl_layout() {
        // vec2<u32>, vec2<u32>, u32, u32, vec2<u32>
        assert_eq!(CARVE_PARAMS_SIZE, 32);
        let params = CarveParams {
            current_size: [4, 3],
            texture_size: [8, 8],
            line: 2,
            axis: 1,
            _pad: [0; 2],
        };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(words, &[4, 3, 8, 8, 2, 1, 0, 0]);
    }
}
