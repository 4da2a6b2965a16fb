//! nokhwa-backed live camera feed.
//!
//! The camera object is created, polled, and dropped on a dedicated capture
//! thread; nokhwa handles on some platforms are unhappy about crossing
//! threads. `acquire` resolves only once the stream's intrinsic dimensions
//! are known, not merely after the device opened.

use super::{Frame, FrameSource, VideoFeed};
use crate::config::CaptureConfig;
use crate::error::CaptureError;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// Latest decoded frame published by the capture thread.
type FrameSlot = Arc<Mutex<Option<(Vec<u8>, u32, u32)>>>;

/// Request the camera and wrap it as a live [`FrameSource`].
///
/// Resolution constraints are flexible (`Closest`): whatever the hardware
/// grants is accepted and reported back through `dimensions`.
pub fn acquire(cfg: &CaptureConfig) -> Result<FrameSource, CaptureError> {
    let (init_tx, init_rx) = mpsc::channel::<Result<(u32, u32), CaptureError>>();
    let stop = Arc::new(AtomicBool::new(false));
    let latest: FrameSlot = Arc::new(Mutex::new(None));

    let thread_stop = Arc::clone(&stop);
    let thread_latest = Arc::clone(&latest);
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(cfg.requested_width, cfg.requested_height),
            FrameFormat::MJPEG,
            cfg.requested_fps,
        ),
    ));
    let device_index = cfg.device_index;

    let thread = std::thread::Builder::new()
        .name("rouge-capture".into())
        .spawn(move || {
            let mut camera = match Camera::new(CameraIndex::Index(device_index), requested) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = init_tx.send(Err(classify(&e)));
                    return;
                }
            };
            if let Err(e) = camera.open_stream() {
                let _ = init_tx.send(Err(classify(&e)));
                return;
            }
            let resolution = camera.resolution();
            let _ = init_tx.send(Ok((resolution.width(), resolution.height())));
            log::info!(
                "camera stream open: {}x{} @ {} fps",
                resolution.width(),
                resolution.height(),
                camera.frame_rate()
            );

            while !thread_stop.load(Ordering::Relaxed) {
                match camera.frame() {
                    Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                        Ok(rgb) => {
                            let (width, height) = (rgb.width(), rgb.height());
                            let rgba = rgb_to_rgba(rgb.as_raw());
                            *thread_latest.lock() = Some((rgba, width, height));
                        }
                        Err(e) => log::warn!("frame decode failed: {e}"),
                    },
                    Err(e) => {
                        log::warn!("frame read failed: {e}");
                        break;
                    }
                }
            }
            if let Err(e) = camera.stop_stream() {
                log::warn!("camera stop_stream failed: {e}");
            }
            log::debug!("capture thread exiting");
        })
        .map_err(|e| CaptureError::Backend(format!("capture thread spawn: {e}")))?;

    let (width, height) = match init_rx.recv() {
        Ok(Ok(dims)) => dims,
        Ok(Err(e)) => {
            // Acquisition failed mid-flight; the thread has already exited.
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            let _ = thread.join();
            return Err(CaptureError::Backend("capture thread died during init".into()));
        }
    };

    Ok(FrameSource::live(Box::new(CameraFeed {
        width,
        height,
        stop,
        latest,
        thread: Some(thread),
    })))
}

/// Map a nokhwa failure onto the closed capture taxonomy at the boundary.
///
/// nokhwa reports platform errors as strings, so busy/denied have to be
/// told apart here; everything past this function sees only the enum.
fn classify(err: &NokhwaError) -> CaptureError {
    match err {
        NokhwaError::OpenDeviceError(_, detail) | NokhwaError::OpenStreamError(detail) => {
            let lower = detail.to_lowercase();
            if lower.contains("busy") || lower.contains("in use") {
                CaptureError::DeviceBusy
            } else if lower.contains("permission") || lower.contains("access") {
                CaptureError::PermissionDenied
            } else {
                CaptureError::NoDevice
            }
        }
        NokhwaError::StructureError { .. } | NokhwaError::GeneralError(_) => CaptureError::NoDevice,
        other => CaptureError::Backend(other.to_string()),
    }
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for pixel in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[pixel[0], pixel[1], pixel[2], 255]);
    }
    rgba
}

struct CameraFeed {
    width: u32,
    height: u32,
    stop: Arc<AtomicBool>,
    latest: FrameSlot,
    thread: Option<JoinHandle<()>>,
}

impl VideoFeed for CameraFeed {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn try_frame(&mut self, timestamp_ms: i64) -> Result<Option<Frame>, CaptureError> {
        match self.latest.lock().take() {
            Some((data, width, height)) => {
                Ok(Some(Frame::from_rgba(data, width, height, timestamp_ms)))
            }
            None => Ok(None),
        }
    }

    fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    log::warn!("capture thread panicked during stop");
                }
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst) && self.thread.is_none()
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture factory backed by the camera. Mirror mode keeps the stream
/// open; selfie mode grabs a single frame and releases the hardware before
/// returning, so the still view holds no tracks.
pub struct CameraCaptureFactory {
    config: CaptureConfig,
}

impl CameraCaptureFactory {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl crate::session::CaptureFactory for CameraCaptureFactory {
    fn acquire(
        &mut self,
        mode: crate::capture::CaptureMode,
    ) -> Result<FrameSource, CaptureError> {
        match mode {
            crate::capture::CaptureMode::Mirror => acquire(&self.config),
            crate::capture::CaptureMode::Selfie => {
                let mut live = acquire(&self.config)?;
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
                loop {
                    if let Some(frame) = live.next_frame(0)? {
                        live.release();
                        return Ok(FrameSource::still(frame));
                    }
                    if std::time::Instant::now() > deadline {
                        live.release();
                        return Err(CaptureError::Backend(
                            "timed out waiting for selfie frame".into(),
                        ));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_appends_opaque_alpha() {
        let rgba = rgb_to_rgba(&[10, 20, 30, 40, 50, 60]);
        assert_eq!(rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn test_classify_busy_stream() {
        let err = NokhwaError::OpenStreamError("Device or resource busy".into());
        assert_eq!(classify(&err), CaptureError::DeviceBusy);
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = NokhwaError::OpenDeviceError("/dev/video0".into(), "Permission denied".into());
        assert_eq!(classify(&err), CaptureError::PermissionDenied);
    }

    #[test]
    fn test_classify_missing_device() {
        let err = NokhwaError::OpenDeviceError("/dev/video9".into(), "No such device".into());
        assert_eq!(classify(&err), CaptureError::NoDevice);
    }
}
