//! # rouge-engine
//!
//! Real-time face-synchronized cosmetic rendering.
//!
//! This crate provides:
//! - **Capture**: a uniform frame source over live camera streams and
//!   captured stills
//! - **Detection**: a pluggable face landmark detector with a one-slot
//!   worker thread
//! - **Geometry**: lip-region triangulation from the landmark set
//! - **Rendering**: a two-pass wgpu pipeline compositing the effect over
//!   the frame
//! - **Lifecycle**: a session owner with idempotent teardown on every exit
//!   path
//!
//! ## Example
//!
//! ```ignore
//! use rouge_engine::{CaptureMode, EngineConfig, Session, SessionDeps, SessionPhase};
//!
//! let deps = SessionDeps { capture, detector, renderer };
//! let mut session = Session::start(EngineConfig::default(), CaptureMode::Mirror, deps);
//!
//! // Once per display refresh:
//! match session.tick() {
//!     SessionPhase::Ready => {}
//!     SessionPhase::Loading => show_spinner(),
//!     SessionPhase::Failed(e) => show_error_panel(e),
//! }
//! ```

pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame_loop;
pub mod geometry;
pub mod render;
pub mod session;

pub use capture::{CaptureMode, Frame, FrameSource, VideoFeed};
pub use config::{CaptureConfig, Delegate, DetectorConfig, EffectConfig, EngineConfig};
pub use detector::{
    DetectionResult, FaceLandmarks, InferenceBackend, LandmarkDetector, FACE_LANDMARK_COUNT,
};
pub use error::{CaptureError, DetectorError, EngineError, SurfaceError, TopologyError};
pub use frame_loop::{FrameLoop, LoopState, TickOutcome};
pub use geometry::{contain_fit, lip_topology, GeometryBuffer, GeometryMapper, RegionTopology};
pub use render::{RenderSink, Renderer};
pub use session::{
    CaptureFactory, DetectorBackendFactory, RenderSinkFactory, Session, SessionDeps, SessionPhase,
};
