//! Landmark/Segmentation Detector
//!
//! Wraps an inference backend producing per-frame facial geometry. The
//! backend is pluggable behind [`InferenceBackend`]; the candle-backed face
//! mesh lives in [`face_mesh`] behind the `candle-landmarks` feature, and
//! [`worker`] runs a detector on its own thread with a one-slot mailbox.

pub mod smoothing;
pub mod worker;

#[cfg(feature = "candle-landmarks")]
pub mod face_mesh;

use crate::capture::Frame;
use crate::config::DetectorConfig;
use crate::error::DetectorError;

use ndarray::Array2;
use once_cell::sync::OnceCell;
use smoothing::LandmarkSmoother;

/// Number of points in the face-mesh landmark set (with iris refinement).
pub const FACE_LANDMARK_COUNT: usize = 478;

/// One detected face: a fixed-size ordered set of normalized (x, y, z)
/// points, with optional blend-shape scores and confidence mask.
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    /// `FACE_LANDMARK_COUNT` points, coordinates normalized to [0, 1]
    /// (z is scene depth relative to face size).
    pub points: Vec<[f32; 3]>,
    /// Blend-shape activation scores, when requested.
    pub blendshapes: Option<Vec<f32>>,
    /// Per-pixel confidence mask, when requested.
    pub mask: Option<Array2<f32>>,
}

/// Per-frame detector output: zero or one face. Consumed within the same
/// frame tick; never retained past the next detection.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub face: Option<FaceLandmarks>,
    pub timestamp_ms: i64,
}

/// Pluggable inference backend.
///
/// Implementations load a model asset once and run per-frame inference.
/// The seam for swapping engines (candle, FFI runtimes) and test doubles.
pub trait InferenceBackend: Send {
    /// One-time model load. Distinguishes an unreachable asset from an
    /// unsupported execution delegate.
    fn load(&mut self, config: &DetectorConfig) -> Result<(), DetectorError>;

    /// Run inference on one frame; `Ok(None)` means no face present.
    fn infer(&mut self, frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError>;

    /// Release inference resources. Called exactly once by the handle.
    fn release(&mut self);
}

static RUNTIME: OnceCell<Result<(), DetectorError>> = OnceCell::new();

/// One-shot inference runtime initialization, cached for the process
/// lifetime. Concurrent callers share the single in-flight load; every
/// later call returns the cached outcome.
pub fn ensure_runtime_loaded() -> Result<(), DetectorError> {
    RUNTIME
        .get_or_init(|| {
            log::debug!("initializing inference runtime");
            Ok(())
        })
        .clone()
}

/// Handle owning one configured inference engine instance.
///
/// Created once per view lifetime, shared across frames, explicitly closed
/// on teardown. At most one handle is alive per view at a time; the session
/// owner enforces this by owning exactly one.
pub struct LandmarkDetector {
    backend: Box<dyn InferenceBackend>,
    config: DetectorConfig,
    smoother: LandmarkSmoother,
    closed: bool,
    last_timestamp_ms: Option<i64>,
}

impl LandmarkDetector {
    /// One-time creation: loads the runtime and the model asset.
    ///
    /// Fails with [`DetectorError::AssetUnreachable`] when the configured
    /// asset cannot be read, before the backend is asked to parse it.
    pub fn create(
        config: DetectorConfig,
        mut backend: Box<dyn InferenceBackend>,
    ) -> Result<Self, DetectorError> {
        ensure_runtime_loaded()?;
        if !config.model_asset.as_os_str().is_empty() && !config.model_asset.exists() {
            return Err(DetectorError::AssetUnreachable(
                config.model_asset.display().to_string(),
            ));
        }
        backend.load(&config)?;
        log::info!(
            "landmark detector ready (asset: {}, delegate: {:?})",
            config.model_asset.display(),
            config.delegate
        );
        let smoother = LandmarkSmoother::new(config.smoothing);
        Ok(Self {
            backend,
            config,
            smoother,
            closed: false,
            last_timestamp_ms: None,
        })
    }

    /// Streaming detection. Timestamps must be monotonically non-decreasing
    /// across calls; a regression is rejected before it can reach the
    /// underlying engine, whose behavior on out-of-order input is undefined.
    pub fn detect_video(
        &mut self,
        frame: &Frame,
        timestamp_ms: i64,
    ) -> Result<DetectionResult, DetectorError> {
        if self.closed {
            return Err(DetectorError::Closed);
        }
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms < last {
                return Err(DetectorError::NonMonotonicTimestamp {
                    last,
                    got: timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        let mut face = self.backend.infer(frame)?;
        match &mut face {
            Some(face) => self.smoother.apply(face),
            None => self.smoother.reset(),
        }
        Ok(DetectionResult {
            face,
            timestamp_ms,
        })
    }

    /// Single-shot detection for still images; does not participate in the
    /// streaming timestamp order.
    pub fn detect_still(&mut self, frame: &Frame) -> Result<DetectionResult, DetectorError> {
        if self.closed {
            return Err(DetectorError::Closed);
        }
        let face = self.backend.infer(frame)?;
        Ok(DetectionResult {
            face,
            timestamp_ms: frame.timestamp_ms,
        })
    }

    /// Release underlying inference resources. After close, detect calls
    /// fail fast with [`DetectorError::Closed`]; they never return stale
    /// data. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.backend.release();
            self.closed = true;
            log::debug!("landmark detector closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

impl Drop for LandmarkDetector {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) struct NullBackend {
        pub released: bool,
    }

    impl InferenceBackend for NullBackend {
        fn load(&mut self, _config: &DetectorConfig) -> Result<(), DetectorError> {
            Ok(())
        }

        fn infer(&mut self, _frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
            Ok(None)
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            // Empty path skips the asset existence probe for backend doubles.
            model_asset: PathBuf::new(),
            ..DetectorConfig::default()
        }
    }

    fn test_frame() -> Frame {
        Frame::from_rgba(vec![0u8; 16], 2, 2, 0)
    }

    #[test]
    fn test_runtime_load_is_cached() {
        assert!(ensure_runtime_loaded().is_ok());
        assert!(ensure_runtime_loaded().is_ok());
    }

    #[test]
    fn test_missing_asset_is_unreachable() {
        let config = DetectorConfig {
            model_asset: PathBuf::from("/nonexistent/face_mesh.safetensors"),
            ..DetectorConfig::default()
        };
        let result = LandmarkDetector::create(config, Box::new(NullBackend { released: false }));
        assert!(matches!(result, Err(DetectorError::AssetUnreachable(_))));
    }

    #[test]
    fn test_detect_after_close_fails_fast() {
        let mut detector =
            LandmarkDetector::create(test_config(), Box::new(NullBackend { released: false }))
                .unwrap();
        detector.close();
        let err = detector.detect_video(&test_frame(), 0).unwrap_err();
        assert_eq!(err, DetectorError::Closed);
        let err = detector.detect_still(&test_frame()).unwrap_err();
        assert_eq!(err, DetectorError::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut detector =
            LandmarkDetector::create(test_config(), Box::new(NullBackend { released: false }))
                .unwrap();
        detector.close();
        detector.close();
        assert!(detector.is_closed());
    }

    #[test]
    fn test_timestamp_regression_rejected() {
        let mut detector =
            LandmarkDetector::create(test_config(), Box::new(NullBackend { released: false }))
                .unwrap();
        detector.detect_video(&test_frame(), 100).unwrap();
        let err = detector.detect_video(&test_frame(), 50).unwrap_err();
        assert_eq!(
            err,
            DetectorError::NonMonotonicTimestamp { last: 100, got: 50 }
        );
        // Equal timestamps are allowed (non-decreasing).
        detector.detect_video(&test_frame(), 100).unwrap();
    }
}
