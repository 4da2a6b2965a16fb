//! GPU Surface Manager
//!
//! Owns the wgpu device/queue/surface triple, keeps the surface buffer at
//! the display element's physical pixel size, and turns device loss into a
//! flag the frame path checks before every submission.

use crate::error::SurfaceError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared device-loss signal, set by wgpu's asynchronous callback.
pub type DeviceLostFlag = Arc<AtomicBool>;

/// Physical buffer size: logical size scaled by the device pixel ratio,
/// rounded, clamped to at least 1x1.
pub fn physical_size(logical: (f32, f32), scale_factor: f64) -> (u32, u32) {
    let width = (logical.0 as f64 * scale_factor).round() as u32;
    let height = (logical.1 as f64 * scale_factor).round() as u32;
    (width.max(1), height.max(1))
}

/// Pick the output format: prefer an sRGB color format, fall back to the
/// first the surface supports.
pub fn select_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| format.is_srgb())
        .or_else(|| formats.first().copied())
}

/// The configured device/surface pair for one mounted view.
pub struct SurfaceState {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    device_lost: DeviceLostFlag,
}

impl SurfaceState {
    /// Create instance, surface, adapter, and device, and configure the
    /// surface at the element's current physical size.
    pub fn initialize(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        logical: (f32, f32),
        scale_factor: f64,
    ) -> Result<Self, SurfaceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(target)
            .map_err(|e| SurfaceError::ContextUnavailable(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        }))
        .map_err(|e| SurfaceError::ContextUnavailable(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rouge-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| SurfaceError::ContextUnavailable(e.to_string()))?;

        let device_lost: DeviceLostFlag = Arc::new(AtomicBool::new(false));
        let lost = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("gpu device lost ({reason:?}): {message}");
            lost.store(true, Ordering::SeqCst);
        });

        let caps = surface.get_capabilities(&adapter);
        let format = select_format(&caps.formats)
            .ok_or_else(|| SurfaceError::ContextUnavailable("no surface format".into()))?;
        let (width, height) = physical_size(logical, scale_factor);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!("surface configured: {width}x{height} {format:?}");

        Ok(Self {
            device,
            queue,
            surface,
            config,
            device_lost,
        })
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Configured buffer size in physical pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    pub fn device_lost_flag(&self) -> DeviceLostFlag {
        Arc::clone(&self.device_lost)
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::SeqCst)
    }

    /// Reconfigure for a new layout size. A no-op when the computed
    /// physical size is unchanged, so resize-observation churn does not
    /// thrash the swapchain. Returns whether a reconfiguration happened.
    pub fn reconfigure(&mut self, logical: (f32, f32), scale_factor: f64) -> bool {
        let (width, height) = physical_size(logical, scale_factor);
        if (width, height) == (self.config.width, self.config.height) {
            return false;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        log::debug!("surface reconfigured: {width}x{height}");
        true
    }

    /// Acquire the next output image. Outdated/lost surfaces are
    /// reconfigured and retried once; a lost device is reported as
    /// [`SurfaceError::DeviceLost`] and nothing further is submitted.
    pub fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, SurfaceError> {
        if self.is_device_lost() {
            return Err(SurfaceError::DeviceLost);
        }
        match self.surface.get_current_texture() {
            Ok(texture) => Ok(texture),
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| SurfaceError::Surface(e.to_string()))
            }
            Err(wgpu::SurfaceError::OutOfMemory) => Err(SurfaceError::DeviceLost),
            Err(e) => Err(SurfaceError::Surface(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_size_applies_pixel_ratio() {
        assert_eq!(physical_size((640.0, 480.0), 2.0), (1280, 960));
        assert_eq!(physical_size((1280.0, 720.0), 2.0), (2560, 1440));
    }

    #[test]
    fn test_physical_size_rounds() {
        assert_eq!(physical_size((100.0, 100.0), 1.5), (150, 150));
        assert_eq!(physical_size((101.0, 101.0), 1.5), (152, 152));
    }

    #[test]
    fn test_physical_size_never_zero() {
        assert_eq!(physical_size((0.0, 0.0), 1.0), (1, 1));
    }

    #[test]
    fn test_select_format_prefers_srgb() {
        let formats = [
            wgpu::TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb,
        ];
        assert_eq!(
            select_format(&formats),
            Some(wgpu::TextureFormat::Bgra8UnormSrgb)
        );
    }

    #[test]
    fn test_select_format_falls_back_to_first() {
        let formats = [wgpu::TextureFormat::Rgba16Float];
        assert_eq!(select_format(&formats), Some(wgpu::TextureFormat::Rgba16Float));
        assert_eq!(select_format(&[]), None);
    }
}
