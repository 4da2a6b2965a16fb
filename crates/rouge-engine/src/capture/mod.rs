//! Capture Source Adapter
//!
//! Abstracts "live camera stream" vs "single still image" as a uniform
//! frame source. Live capture goes through the pluggable [`VideoFeed`]
//! trait so different camera backends (and test doubles) can be plugged in;
//! the nokhwa-backed implementation lives in [`camera`] behind the `camera`
//! feature.

#[cfg(feature = "camera")]
pub mod camera;

use crate::error::CaptureError;
use std::path::Path;
use std::sync::Arc;

/// How the view captures its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Continuous live capture, mirror-like preview.
    Mirror,
    /// Single still capture, then continuous detection on that still.
    Selfie,
}

/// One video frame: shared RGBA8 pixels plus a monotonic timestamp.
///
/// Cloning is cheap; the pixel buffer is shared. A frame handed to the
/// detector worker and the renderer within one tick is the same allocation.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Tightly-packed RGBA8 pixel data, `width * height * 4` bytes.
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Capture timestamp on the session's monotonic clock, in milliseconds.
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32, timestamp_ms: i64) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self {
            data: data.into(),
            width,
            height,
            timestamp_ms,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Decode an image file into a still frame (RGBA8).
pub fn still_from_path(path: impl AsRef<Path>) -> Result<Frame, CaptureError> {
    let image = image::open(path)
        .map_err(|e| CaptureError::Backend(format!("image load: {e}")))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(Frame::from_rgba(image.into_raw(), width, height, 0))
}

/// Pluggable live camera feed.
///
/// Implementations own the hardware tracks. `try_frame` returning
/// `Ok(None)` means "no frame buffered yet" and is not an error; the frame
/// loop reschedules and skips the tick.
pub trait VideoFeed: Send {
    /// Intrinsic stream dimensions, known once the stream has started.
    fn dimensions(&self) -> (u32, u32);

    /// Pull the current frame, stamping it with the given timestamp.
    fn try_frame(&mut self, timestamp_ms: i64) -> Result<Option<Frame>, CaptureError>;

    /// Stop every underlying hardware track. Must be idempotent.
    fn stop(&mut self);

    /// Whether all tracks have reached a stopped state.
    fn is_stopped(&self) -> bool;
}

enum SourceKind {
    Live(Box<dyn VideoFeed>),
    Still(Frame),
    Released,
}

/// The active frame source for one mounted view.
///
/// Exactly one exists per view; released on mode exit or view teardown.
pub struct FrameSource {
    kind: SourceKind,
}

impl FrameSource {
    /// Wrap a started live feed. The feed's intrinsic dimensions must
    /// already be known (the adapter resolves acquisition only after
    /// stream metadata is available).
    pub fn live(feed: Box<dyn VideoFeed>) -> Self {
        Self {
            kind: SourceKind::Live(feed),
        }
    }

    /// Wrap a captured still with fixed dimensions and no ongoing lifecycle.
    pub fn still(frame: Frame) -> Self {
        Self {
            kind: SourceKind::Still(frame),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, SourceKind::Live(_))
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.kind {
            SourceKind::Live(feed) => Some(feed.dimensions()),
            SourceKind::Still(frame) => Some((frame.width, frame.height)),
            SourceKind::Released => None,
        }
    }

    /// Current frame for this tick, or `Ok(None)` when the feed has no
    /// frame buffered yet.
    pub fn next_frame(&mut self, timestamp_ms: i64) -> Result<Option<Frame>, CaptureError> {
        match &mut self.kind {
            SourceKind::Live(feed) => feed.try_frame(timestamp_ms),
            SourceKind::Still(frame) => {
                let mut frame = frame.clone();
                frame.timestamp_ms = timestamp_ms;
                Ok(Some(frame))
            }
            SourceKind::Released => Ok(None),
        }
    }

    /// Stop all hardware tracks and detach. Idempotent, and safe on a
    /// source whose acquisition never fully completed.
    pub fn release(&mut self) {
        if let SourceKind::Live(feed) = &mut self.kind {
            feed.stop();
            log::debug!("live frame source released");
        }
        self.kind = SourceKind::Released;
    }

    pub fn is_released(&self) -> bool {
        matches!(self.kind, SourceKind::Released)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Capture factory serving a fixed still frame regardless of mode. Used
/// when the embedder already holds the captured image (e.g. a selfie taken
/// in a prior live session).
pub struct StillCaptureFactory {
    frame: Frame,
}

impl StillCaptureFactory {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

impl crate::session::CaptureFactory for StillCaptureFactory {
    fn acquire(&mut self, _mode: CaptureMode) -> Result<FrameSource, CaptureError> {
        Ok(FrameSource::still(self.frame.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFeed {
        stopped: bool,
    }

    impl VideoFeed for FakeFeed {
        fn dimensions(&self) -> (u32, u32) {
            (640, 480)
        }

        fn try_frame(&mut self, timestamp_ms: i64) -> Result<Option<Frame>, CaptureError> {
            if self.stopped {
                return Ok(None);
            }
            let data = vec![0u8; 640 * 480 * 4];
            Ok(Some(Frame::from_rgba(data, 640, 480, timestamp_ms)))
        }

        fn stop(&mut self) {
            self.stopped = true;
        }

        fn is_stopped(&self) -> bool {
            self.stopped
        }
    }

    #[test]
    fn test_still_source_restamps_frames() {
        let frame = Frame::from_rgba(vec![0u8; 16], 2, 2, 0);
        let mut source = FrameSource::still(frame);
        let first = source.next_frame(10).unwrap().unwrap();
        let second = source.next_frame(20).unwrap().unwrap();
        assert_eq!(first.timestamp_ms, 10);
        assert_eq!(second.timestamp_ms, 20);
        // Pixels are shared, not copied.
        assert!(Arc::ptr_eq(&first.data, &second.data));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut source = FrameSource::live(Box::new(FakeFeed { stopped: false }));
        source.release();
        source.release();
        assert!(source.is_released());
        assert!(source.next_frame(0).unwrap().is_none());
    }

    #[test]
    fn test_released_source_reports_no_dimensions() {
        let mut source = FrameSource::live(Box::new(FakeFeed { stopped: false }));
        assert_eq!(source.dimensions(), Some((640, 480)));
        source.release();
        assert_eq!(source.dimensions(), None);
    }

    #[test]
    fn test_frame_aspect() {
        let frame = Frame::from_rgba(vec![0u8; 640 * 480 * 4], 640, 480, 0);
        assert!((frame.aspect() - 4.0 / 3.0).abs() < 1e-6);
    }
}
