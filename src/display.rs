//! Read-only visualisation of the carve state: the current image (or its
//! energy map) letterboxed into the window, with the last seam in red.

use bytemuck::{Pod, Zeroable};

use crate::carve::{Axis, Dimensions, GpuSeamEngine};
use crate::events::DebugView;
use crate::gpu::kernels::{sampled_texture_in, storage_buffer_in};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct DisplayParams {
    window_size: [f32; 2],
    image_size: [u32; 2],
    view_mode: u32,
    show_seam: u32,
    seam_horizontal: u32,
    encode_srgb: u32,
    energy_scale: f32,
    _pad: [u32; 3],
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    pub view: DebugView,
    pub show_seam: bool,
    pub energy_scale: f32,
}

pub struct DisplayPass {
    pipeline: wgpu::RenderPipeline,
    params: wgpu::Buffer,
    /// One per ping/pong source.
    groups: [wgpu::BindGroup; 2],
    encode_srgb: bool,
}

impl DisplayPass {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, engine: &GpuSeamEngine) -> Self {
        let fragment = wgpu::ShaderStages::FRAGMENT;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("display-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: fragment,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                sampled_texture_in(1, true, fragment),
                sampled_texture_in(2, false, fragment),
                storage_buffer_in(3, true, fragment),
            ],
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("display-params"),
            size: std::mem::size_of::<DisplayParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let views = engine.working_views();
        let groups = [0, 1].map(|source| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("display"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[source]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(engine.energy_view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: engine.seam_buffer().as_entire_binding(),
                    },
                ],
            })
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("display"),
            source: wgpu::ShaderSource::Wgsl(include_str!("gpu/shaders/display.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("display"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("display"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            params,
            groups,
            // An sRGB target encodes on store; anything else gets it in the shader.
            encode_srgb: !format.is_srgb(),
        }
    }

    /// Record the frame. `image` is the current valid size, `None` when
    /// nothing is loaded (the frame is just cleared).
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        window: Dimensions,
        image: Option<Dimensions>,
        engine: &GpuSeamEngine,
        options: DisplayOptions,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("display"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let Some(image) = image else {
            return;
        };
        if image.pixel_count() == 0 || window.pixel_count() == 0 {
            return;
        }

        let seam_axis = engine.last_axis();
        let params = DisplayParams {
            window_size: [window.width as f32, window.height as f32],
            image_size: [image.width, image.height],
            view_mode: options.view.as_u32(),
            show_seam: u32::from(options.show_seam && seam_axis.is_some()),
            seam_horizontal: u32::from(seam_axis == Some(Axis::Horizontal)),
            encode_srgb: u32::from(self.encode_srgb),
            energy_scale: options.energy_scale,
            _pad: [0; 3],
        };
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(&params));

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.groups[engine.source_index()], &[]);
        pass.draw(0..3, 0..1);
    }
}
