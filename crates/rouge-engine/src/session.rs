//! Lifecycle/Resource Owner
//!
//! One [`Session`] per mounted view. It owns the frame source, the detector
//! worker, the render sink, and the frame loop; creates them in dependency
//! order; and guarantees teardown runs exactly once per mount, on every
//! exit path. Components are built through factories so a failed startup
//! can be retried and a lost device rebuilt without reaching into shared
//! mutable state.

use crate::capture::{CaptureMode, FrameSource};
use crate::config::EngineConfig;
use crate::detector::worker::DetectorWorker;
use crate::detector::InferenceBackend;
use crate::error::{CaptureError, EngineError, SurfaceError};
use crate::frame_loop::{FrameLoop, TickOutcome};
use crate::geometry::{lip_topology, GeometryMapper};
use crate::render::RenderSink;

use std::time::Instant;

/// Builds the frame source for a mode. Re-invoked on retry and mode switch.
pub trait CaptureFactory: Send {
    fn acquire(&mut self, mode: CaptureMode) -> Result<FrameSource, CaptureError>;
}

/// Builds a fresh inference backend for each detector creation.
pub trait DetectorBackendFactory: Send {
    fn create(&mut self) -> Box<dyn InferenceBackend>;
}

/// Builds the render sink. Re-invoked after device loss.
pub trait RenderSinkFactory: Send {
    fn create(&mut self) -> Result<Box<dyn RenderSink>, SurfaceError>;
}

/// The collaborators a session builds its components from.
pub struct SessionDeps {
    pub capture: Box<dyn CaptureFactory>,
    pub detector: Box<dyn DetectorBackendFactory>,
    pub renderer: Box<dyn RenderSinkFactory>,
}

/// What the embedder shows: a loading indicator, the live view, or a
/// retryable error panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Startup in progress (model load, first frame pending).
    Loading,
    /// Frames are being presented.
    Ready,
    /// Initialization failed; `EngineError::is_retryable` gates the retry
    /// affordance.
    Failed(EngineError),
}

pub struct Session {
    config: EngineConfig,
    mode: CaptureMode,
    deps: SessionDeps,
    frame_loop: Option<FrameLoop>,
    phase: SessionPhase,
    torn_down: bool,
    device_loss_used: bool,
    clock: Instant,
    last_layout: Option<((f32, f32), f64)>,
}

impl Session {
    /// Create the session and run the startup sequence. Initialization
    /// errors land in the returned session's phase rather than aborting,
    /// so the embedder can offer a retry.
    pub fn start(config: EngineConfig, mode: CaptureMode, deps: SessionDeps) -> Self {
        let mut session = Self {
            config,
            mode,
            deps,
            frame_loop: None,
            phase: SessionPhase::Loading,
            torn_down: false,
            device_loss_used: false,
            clock: Instant::now(),
            last_layout: None,
        };
        session.initialize();
        session
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn now_ms(&self) -> i64 {
        self.clock.elapsed().as_millis() as i64
    }

    fn initialize(&mut self) {
        match self.try_initialize() {
            Ok(mut frame_loop) => {
                frame_loop.start();
                if let Some((logical, scale)) = self.last_layout {
                    frame_loop.resize(logical, scale);
                }
                self.frame_loop = Some(frame_loop);
                self.phase = SessionPhase::Loading;
            }
            Err(e) => {
                log::error!("session startup failed: {e}");
                self.phase = SessionPhase::Failed(e);
            }
        }
    }

    /// Build components in dependency order. On failure, the partial
    /// attempt is cleaned up locally; the factories stay intact for a
    /// later retry.
    fn try_initialize(&mut self) -> Result<FrameLoop, EngineError> {
        let source = self.deps.capture.acquire(self.mode)?;
        let backend = self.deps.detector.create();
        let mut worker = DetectorWorker::spawn(self.config.detector.clone(), backend);
        let sink = match self.deps.renderer.create() {
            Ok(sink) => sink,
            Err(e) => {
                // Local cleanup of the superseded attempt.
                worker.shutdown();
                let mut source = source;
                source.release();
                return Err(e.into());
            }
        };
        let mapper = GeometryMapper::new(lip_topology(), self.config.effect.mirror);
        Ok(FrameLoop::new(source, worker, sink, mapper))
    }

    /// Drive one display-refresh tick and report the current phase.
    pub fn tick(&mut self) -> SessionPhase {
        if self.torn_down {
            return self.phase.clone();
        }
        let now = self.now_ms();
        let outcome = match self.frame_loop.as_mut() {
            Some(frame_loop) => frame_loop.tick(now),
            None => return self.phase.clone(),
        };
        match outcome {
            TickOutcome::Rendered => {
                if self.phase == SessionPhase::Loading {
                    log::info!("first frame presented");
                    self.phase = SessionPhase::Ready;
                }
            }
            TickOutcome::Inactive | TickOutcome::Waiting | TickOutcome::Skipped => {}
            TickOutcome::DetectorFailed(e) => {
                log::error!("detector load failed: {e}");
                self.cleanup_components();
                self.phase = SessionPhase::Failed(e.into());
            }
            TickOutcome::DeviceLost => self.handle_device_loss(),
        }
        self.phase.clone()
    }

    /// The display element's layout size changed.
    pub fn resize(&mut self, logical: (f32, f32), scale_factor: f64) {
        self.last_layout = Some((logical, scale_factor));
        if let Some(frame_loop) = self.frame_loop.as_mut() {
            frame_loop.resize(logical, scale_factor);
        }
    }

    /// Full restart through the factories after an initialization failure.
    /// A no-op once final teardown has run.
    pub fn retry(&mut self) {
        if self.torn_down {
            log::warn!("retry ignored: session already torn down");
            return;
        }
        self.cleanup_components();
        self.device_loss_used = false;
        self.phase = SessionPhase::Loading;
        self.initialize();
    }

    /// Switch between mirror and selfie capture. The old instance's camera
    /// tracks are fully stopped before the new acquisition is issued; most
    /// camera hardware permits only one active consumer.
    pub fn switch_mode(&mut self, mode: CaptureMode) {
        if self.torn_down {
            log::warn!("mode switch ignored: session already torn down");
            return;
        }
        self.cleanup_components();
        self.mode = mode;
        self.device_loss_used = false;
        self.phase = SessionPhase::Loading;
        self.initialize();
    }

    /// Device loss: one automatic full teardown + reinitialization; a
    /// second loss is fatal for the mount.
    fn handle_device_loss(&mut self) {
        if self.device_loss_used {
            log::error!("gpu device lost again, giving up");
            self.cleanup_components();
            self.phase = SessionPhase::Failed(SurfaceError::DeviceLost.into());
            return;
        }
        self.device_loss_used = true;
        log::warn!("gpu device lost, reinitializing once");
        self.cleanup_components();
        self.phase = SessionPhase::Loading;
        self.initialize();
    }

    /// Stop and release everything owned by the current attempt, in
    /// teardown order: loop stop, detector close, source release, GPU
    /// resources dropped. Leaves the factories untouched so a retry can
    /// rebuild; does not mark the session as torn down.
    fn cleanup_components(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
            frame_loop.clear_output();
            frame_loop.shutdown_detector();
            frame_loop.release_source();
            // The sink (and its device/pipelines) drops with the loop.
        }
    }

    /// Final teardown. Idempotent: the second and later calls do nothing.
    /// After this, retry and mode switch are refused.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.cleanup_components();
        self.torn_down = true;
        log::info!("session torn down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
