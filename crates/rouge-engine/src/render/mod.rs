//! GPU rendering: surface management, the compiled pipeline set, and the
//! renderer facade.
//!
//! Callers never reach past [`RenderSink`]: one method to composite a frame
//! with the current effect geometry, one to clear. Everything else (surface
//! configuration, texture upload, pass encoding) is internal.

pub mod pipeline;
pub mod surface;

pub use pipeline::PipelineSet;
pub use surface::SurfaceState;

use crate::capture::Frame;
use crate::config::EffectConfig;
use crate::error::SurfaceError;
use crate::geometry::{contain_fit, GeometryBuffer};
use pipeline::{BackgroundUniforms, OverlayUniforms};

/// The rendering interface the frame loop drives.
pub trait RenderSink: Send {
    /// Composite one frame with the current effect geometry and present it.
    fn submit_frame(
        &mut self,
        frame: &Frame,
        geometry: &GeometryBuffer,
    ) -> Result<(), SurfaceError>;

    /// Present a cleared surface.
    fn clear(&mut self) -> Result<(), SurfaceError>;

    /// The display element's layout size changed.
    fn resize(&mut self, logical: (f32, f32), scale_factor: f64);
}

struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// wgpu-backed [`RenderSink`] for one mounted view.
pub struct Renderer {
    state: SurfaceState,
    pipelines: PipelineSet,
    frame_texture: Option<FrameTexture>,
    effect: EffectConfig,
}

impl Renderer {
    pub fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        logical: (f32, f32),
        scale_factor: f64,
        effect: EffectConfig,
        vertex_capacity: usize,
    ) -> Result<Self, SurfaceError> {
        let state = SurfaceState::initialize(target, logical, scale_factor)?;
        let pipelines = PipelineSet::build(&state.device, state.format(), vertex_capacity)?;
        Ok(Self {
            state,
            pipelines,
            frame_texture: None,
            effect,
        })
    }

    fn ensure_frame_texture(&mut self, width: u32, height: u32) {
        let stale = self
            .frame_texture
            .as_ref()
            .map(|t| t.width != width || t.height != height)
            .unwrap_or(true);
        if !stale {
            return;
        }
        log::debug!("allocating frame texture: {width}x{height}");
        let texture = self.state.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame-texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self
            .state
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("frame-bind-group"),
                layout: &self.pipelines.frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.pipelines.sampler),
                    },
                ],
            });
        self.frame_texture = Some(FrameTexture {
            texture,
            bind_group,
            width,
            height,
        });
    }

    fn upload_frame(&mut self, frame: &Frame) {
        self.ensure_frame_texture(frame.width, frame.height);
        let cached = self.frame_texture.as_ref().expect("texture just ensured");
        self.state.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &cached.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl RenderSink for Renderer {
    fn submit_frame(
        &mut self,
        frame: &Frame,
        geometry: &GeometryBuffer,
    ) -> Result<(), SurfaceError> {
        if self.state.is_device_lost() {
            return Err(SurfaceError::DeviceLost);
        }

        self.upload_frame(frame);

        let scale = contain_fit(frame.aspect(), self.state.aspect());
        self.state.queue.write_buffer(
            &self.pipelines.background_uniforms,
            0,
            bytemuck::cast_slice(&[BackgroundUniforms {
                scale,
                mirror: if self.effect.mirror { 1.0 } else { 0.0 },
                _pad: 0.0,
            }]),
        );
        self.state.queue.write_buffer(
            &self.pipelines.overlay_uniforms,
            0,
            bytemuck::cast_slice(&[OverlayUniforms {
                color: self.effect.lip_color,
            }]),
        );
        if !geometry.is_empty() {
            self.state.queue.write_buffer(
                &self.pipelines.vertex_buffer,
                0,
                bytemuck::cast_slice(geometry.vertices()),
            );
        }

        let output = self.state.acquire()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.state
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame-encoder"),
                });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let frame_group = &self
                .frame_texture
                .as_ref()
                .expect("frame texture uploaded above")
                .bind_group;
            pass.set_pipeline(&self.pipelines.background);
            pass.set_bind_group(0, frame_group, &[]);
            pass.set_bind_group(1, &self.pipelines.background_uniform_group, &[]);
            pass.draw(0..6, 0..1);

            if !geometry.is_empty() {
                let bytes = (geometry.vertex_count() * std::mem::size_of::<[f32; 2]>()) as u64;
                pass.set_pipeline(&self.pipelines.overlay);
                pass.set_bind_group(0, &self.pipelines.overlay_uniform_group, &[]);
                pass.set_vertex_buffer(0, self.pipelines.vertex_buffer.slice(..bytes));
                pass.draw(0..geometry.vertex_count() as u32, 0..1);
            }
        }
        self.state.queue.submit(Some(encoder.finish()));
        output.present();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SurfaceError> {
        if self.state.is_device_lost() {
            return Err(SurfaceError::DeviceLost);
        }
        let output = self.state.acquire()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.state
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("clear-encoder"),
                });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.state.queue.submit(Some(encoder.finish()));
        output.present();
        Ok(())
    }

    fn resize(&mut self, logical: (f32, f32), scale_factor: f64) {
        self.state.reconfigure(logical, scale_factor);
    }
}

/// Render sink factory over a cloneable surface target (e.g. an
/// `Arc<winit::window::Window>`). Each call builds a fresh device, surface,
/// and pipeline set, which is what device-loss recovery needs.
pub struct WindowRenderFactory<T> {
    target: T,
    logical: (f32, f32),
    scale_factor: f64,
    effect: EffectConfig,
    vertex_capacity: usize,
}

impl<T> WindowRenderFactory<T>
where
    T: Into<wgpu::SurfaceTarget<'static>> + Clone + Send,
{
    pub fn new(
        target: T,
        logical: (f32, f32),
        scale_factor: f64,
        effect: EffectConfig,
        vertex_capacity: usize,
    ) -> Self {
        Self {
            target,
            logical,
            scale_factor,
            effect,
            vertex_capacity,
        }
    }
}

impl<T> crate::session::RenderSinkFactory for WindowRenderFactory<T>
where
    T: Into<wgpu::SurfaceTarget<'static>> + Clone + Send,
{
    fn create(&mut self) -> Result<Box<dyn RenderSink>, crate::error::SurfaceError> {
        Ok(Box::new(Renderer::new(
            self.target.clone(),
            self.logical,
            self.scale_factor,
            self.effect.clone(),
            self.vertex_capacity,
        )?))
    }
}
