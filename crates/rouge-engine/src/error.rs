//! Error taxonomy for the try-on engine.
//!
//! Every failure is a closed enum produced at the point of failure. The
//! embedding application matches on variants to pick a user-facing message;
//! nothing downstream inspects error strings.

use thiserror::Error;

/// Camera / still acquisition failures. Recoverable: re-invoking
/// acquisition is always safe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no camera device found")]
    NoDevice,
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera device busy")]
    DeviceBusy,
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Landmark detector failures. Load-time variants block startup and are
/// recoverable only by a full retry of detector creation; `Inference` is a
/// per-frame error swallowed at the frame boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("model asset unreachable: {0}")]
    AssetUnreachable(String),
    #[error("unsupported execution delegate: {0}")]
    UnsupportedDelegate(String),
    #[error("detector closed")]
    Closed,
    #[error("non-monotonic timestamp: {got}ms after {last}ms")]
    NonMonotonicTimestamp { last: i64, got: i64 },
    #[error("inference error: {0}")]
    Inference(String),
}

/// GPU surface and pipeline failures. `ContextUnavailable` is fatal for the
/// mount; `DeviceLost` is recoverable by one automatic reinitialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("rendering context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("gpu device lost")]
    DeviceLost,
    #[error("pipeline build failed: {0}")]
    PipelineBuild(String),
    #[error("surface error: {0}")]
    Surface(String),
}

/// Region topology validation failures, raised at topology-definition time,
/// never per frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("landmark index {index} out of range for {landmark_count}-point set")]
    IndexOutOfRange { index: usize, landmark_count: usize },
    #[error("topology has no triangles")]
    Empty,
}

/// Aggregate error surfaced by the session owner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl EngineError {
    /// Whether a retry affordance should be presented for this error.
    ///
    /// Capture and detector-load errors are always retryable; a lost device
    /// is retryable until the session has already used its one automatic
    /// recovery; an unavailable context is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::Surface(SurfaceError::ContextUnavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_errors_are_retryable() {
        assert!(EngineError::from(CaptureError::PermissionDenied).is_retryable());
        assert!(EngineError::from(CaptureError::DeviceBusy).is_retryable());
    }

    #[test]
    fn test_context_unavailable_is_fatal() {
        let err = EngineError::from(SurfaceError::ContextUnavailable("no adapter".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(CaptureError::NoDevice.to_string(), "no camera device found");
        assert_eq!(DetectorError::Closed.to_string(), "detector closed");
        assert_eq!(SurfaceError::DeviceLost.to_string(), "gpu device lost");
    }
}
