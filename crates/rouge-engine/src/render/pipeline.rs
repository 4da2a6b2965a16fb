//! Render Pipeline Set
//!
//! The two compiled passes for one device/format pair: a background pass
//! sampling the current frame with a contain fit, and a lip overlay pass
//! alpha-blended on top. Immutable once built; rebuilt from scratch when
//! the device is lost.

use crate::error::SurfaceError;
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct BackgroundUniforms {
    /// Contain-fit scale from [`crate::geometry::contain_fit`].
    pub scale: [f32; 2],
    /// 1.0 to mirror the frame horizontally.
    pub mirror: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct OverlayUniforms {
    /// Effect tint, straight-alpha RGBA.
    pub color: [f32; 4],
}

/// Compiled pipelines plus every bindable resource they need. All GPU
/// allocation happens here, at build time; the per-frame path only writes
/// buffer and texture contents.
pub struct PipelineSet {
    pub background: wgpu::RenderPipeline,
    pub overlay: wgpu::RenderPipeline,
    pub background_uniforms: wgpu::Buffer,
    pub overlay_uniforms: wgpu::Buffer,
    pub sampler: wgpu::Sampler,
    pub frame_layout: wgpu::BindGroupLayout,
    pub background_uniform_group: wgpu::BindGroup,
    pub overlay_uniform_group: wgpu::BindGroup,
    /// Overlay vertex buffer, sized to the topology's worst case.
    pub vertex_buffer: wgpu::Buffer,
    pub vertex_capacity: usize,
}

impl PipelineSet {
    /// Compile both passes for the given output format.
    ///
    /// Runs inside a validation error scope: if either pass fails to
    /// compile, the whole build fails with one aggregate error instead of
    /// rendering with a partially-missing effect.
    pub fn build(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        vertex_capacity: usize,
    ) -> Result<Self, SurfaceError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let set = Self::build_inner(device, format, vertex_capacity);
        match pollster::block_on(device.pop_error_scope()) {
            None => Ok(set),
            Some(error) => Err(SurfaceError::PipelineBuild(error.to_string())),
        }
    }

    fn build_inner(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        vertex_capacity: usize,
    ) -> Self {
        let background_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("background-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/background.wgsl").into()),
        });
        let overlay_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("overlay-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/overlay.wgsl").into()),
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_layout_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let background_uniform_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("background-uniform-layout"),
                entries: &[uniform_layout_entry],
            });
        let overlay_uniform_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("overlay-uniform-layout"),
                entries: &[uniform_layout_entry],
            });

        let background_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("background-uniforms"),
            size: std::mem::size_of::<BackgroundUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let overlay_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay-uniforms"),
            size: std::mem::size_of::<OverlayUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay-vertices"),
            size: (vertex_capacity * std::mem::size_of::<[f32; 2]>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let background_uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("background-uniform-group"),
            layout: &background_uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: background_uniforms.as_entire_binding(),
            }],
        });
        let overlay_uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("overlay-uniform-group"),
            layout: &overlay_uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: overlay_uniforms.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let background_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("background-pipeline-layout"),
                bind_group_layouts: &[&frame_layout, &background_uniform_layout],
                push_constant_ranges: &[],
            });
        let background = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("background-pipeline"),
            layout: Some(&background_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &background_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &background_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let overlay_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("overlay-pipeline-layout"),
                bind_group_layouts: &[&overlay_uniform_layout],
                push_constant_ranges: &[],
            });
        let overlay = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("overlay-pipeline"),
            layout: Some(&overlay_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &overlay_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &overlay_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        Self {
            background,
            overlay,
            background_uniforms,
            overlay_uniforms,
            sampler,
            frame_layout,
            background_uniform_group,
            overlay_uniform_group,
            vertex_buffer,
            vertex_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<BackgroundUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<OverlayUniforms>() % 16, 0);
    }
}
