//! Frame Loop Controller
//!
//! The per-tick scheduling primitive. Cooperatively driven: the embedder
//! calls [`FrameLoop::tick`] once per display refresh for the lifetime of
//! the mounted view. A tick pulls the current frame, hands it to the
//! detector worker when one is not already in flight, maps geometry, and
//! submits a render. The loop never blocks waiting on detection; a tick
//! without a fresh result draws the previous geometry (or background only).

use crate::capture::FrameSource;
use crate::detector::worker::{DetectJob, DetectorWorker, WorkerEvent};
use crate::error::{DetectorError, SurfaceError};
use crate::geometry::{GeometryBuffer, GeometryMapper};
use crate::render::RenderSink;

/// Loop lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed or fully stopped.
    Idle,
    /// Waiting for the detector worker's one-time load.
    Starting,
    /// Ticking normally.
    Running,
    /// A prerequisite (the render sink) is temporarily unavailable;
    /// retried every tick, bounded only by the owner's teardown.
    Suspended,
    /// Stop requested; the next tick transitions to `Idle`.
    Stopping,
}

/// What one tick did. Per-frame errors are logged and folded into
/// `Skipped`; only the conditions the session owner must react to get
/// their own variants.
#[derive(Debug)]
pub enum TickOutcome {
    /// The loop is idle or stopping; nothing was processed.
    Inactive,
    /// Starting or suspended; prerequisites not met this tick.
    Waiting,
    /// A frame was composited and presented.
    Rendered,
    /// The tick was skipped (no frame buffered, or a swallowed per-frame
    /// error); the previous image stays on screen.
    Skipped,
    /// The GPU device is gone; the owner must reinitialize or fail.
    DeviceLost,
    /// The detector's one-time load failed; the owner surfaces it.
    DetectorFailed(DetectorError),
}

pub struct FrameLoop {
    source: FrameSource,
    worker: DetectorWorker,
    sink: Option<Box<dyn RenderSink>>,
    mapper: GeometryMapper,
    geometry: GeometryBuffer,
    state: LoopState,
    detection_in_flight: bool,
    still_source: bool,
}

impl FrameLoop {
    pub fn new(
        source: FrameSource,
        worker: DetectorWorker,
        sink: Box<dyn RenderSink>,
        mapper: GeometryMapper,
    ) -> Self {
        let geometry = GeometryBuffer::for_topology(mapper.topology());
        let still_source = !source.is_live();
        Self {
            source,
            worker,
            sink: Some(sink),
            mapper,
            geometry,
            state: LoopState::Idle,
            detection_in_flight: false,
            still_source,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Begin ticking. The owner calls this once all components are ready.
    pub fn start(&mut self) {
        if self.state == LoopState::Idle {
            self.state = LoopState::Starting;
        }
    }

    /// Request a stop. Cancellation is synchronous with respect to frame
    /// processing: once this returns, no further frame is processed.
    pub fn stop(&mut self) {
        match self.state {
            LoopState::Idle => {}
            _ => self.state = LoopState::Stopping,
        }
    }

    /// One display-refresh tick.
    pub fn tick(&mut self, now_ms: i64) -> TickOutcome {
        match self.state {
            LoopState::Idle => TickOutcome::Inactive,
            LoopState::Stopping => {
                self.state = LoopState::Idle;
                TickOutcome::Inactive
            }
            LoopState::Starting => match self.worker.poll() {
                Some(WorkerEvent::Ready) => {
                    log::info!("detector ready, frame loop running");
                    self.state = LoopState::Running;
                    self.running_tick(now_ms)
                }
                Some(WorkerEvent::LoadFailed(e)) => TickOutcome::DetectorFailed(e),
                _ => TickOutcome::Waiting,
            },
            LoopState::Suspended => {
                if self.sink.is_some() {
                    self.state = LoopState::Running;
                    self.running_tick(now_ms)
                } else {
                    TickOutcome::Waiting
                }
            }
            LoopState::Running => self.running_tick(now_ms),
        }
    }

    fn running_tick(&mut self, now_ms: i64) -> TickOutcome {
        if self.sink.is_none() {
            self.state = LoopState::Suspended;
            return TickOutcome::Waiting;
        }

        // Fold in any detection that completed since the last tick.
        while let Some(event) = self.worker.poll() {
            match event {
                WorkerEvent::Result(result) => {
                    self.detection_in_flight = false;
                    self.mapper.map(&result, &mut self.geometry);
                }
                WorkerEvent::Error(e) => {
                    self.detection_in_flight = false;
                    log::warn!("detection failed, keeping last geometry: {e}");
                }
                WorkerEvent::Ready => {}
                WorkerEvent::LoadFailed(e) => return TickOutcome::DetectorFailed(e),
            }
        }

        let frame = match self.source.next_frame(now_ms) {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::Skipped,
            Err(e) => {
                log::warn!("frame read failed: {e}");
                return TickOutcome::Skipped;
            }
        };

        // At most one detection in flight; a busy worker means this tick
        // skips detection, never queues it.
        if !self.detection_in_flight {
            let job = if self.still_source {
                DetectJob::Still {
                    frame: frame.clone(),
                }
            } else {
                DetectJob::Video {
                    frame: frame.clone(),
                    timestamp_ms: now_ms,
                }
            };
            if self.worker.try_submit(job) {
                self.detection_in_flight = true;
            }
        }

        let sink = self.sink.as_mut().expect("sink checked above");
        match sink.submit_frame(&frame, &self.geometry) {
            Ok(()) => TickOutcome::Rendered,
            Err(SurfaceError::DeviceLost) => TickOutcome::DeviceLost,
            Err(e) => {
                log::warn!("render failed, holding last frame: {e}");
                TickOutcome::Skipped
            }
        }
    }

    /// Present a cleared surface, so the last camera frame does not linger
    /// after the loop stops.
    pub fn clear_output(&mut self) {
        if let Some(sink) = &mut self.sink {
            if let Err(e) = sink.clear() {
                log::debug!("clear on stop failed: {e}");
            }
        }
    }

    /// Forward a layout-size change to the sink.
    pub fn resize(&mut self, logical: (f32, f32), scale_factor: f64) {
        if let Some(sink) = &mut self.sink {
            sink.resize(logical, scale_factor);
        }
    }

    /// Detach the sink (the loop suspends until one is reinstalled).
    pub fn take_sink(&mut self) -> Option<Box<dyn RenderSink>> {
        self.sink.take()
    }

    /// Install a (re)built sink; a suspended loop resumes on its next tick.
    pub fn install_sink(&mut self, sink: Box<dyn RenderSink>) {
        self.sink = Some(sink);
    }

    /// Close the detector and join its worker thread.
    pub fn shutdown_detector(&mut self) {
        self.worker.shutdown();
    }

    pub fn detector_is_shut_down(&self) -> bool {
        self.worker.is_shut_down()
    }

    /// Stop all capture tracks.
    pub fn release_source(&mut self) {
        self.source.release();
    }

    pub fn source_is_released(&self) -> bool {
        self.source.is_released()
    }

    pub fn geometry(&self) -> &GeometryBuffer {
        &self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, VideoFeed};
    use crate::config::DetectorConfig;
    use crate::detector::{FaceLandmarks, InferenceBackend};
    use crate::error::CaptureError;
    use crate::geometry::lip_topology;
    use std::path::PathBuf;
    use std::time::Duration;

    struct TickFeed;

    impl VideoFeed for TickFeed {
        fn dimensions(&self) -> (u32, u32) {
            (64, 48)
        }
        fn try_frame(&mut self, timestamp_ms: i64) -> Result<Option<Frame>, CaptureError> {
            Ok(Some(Frame::from_rgba(
                vec![0u8; 64 * 48 * 4],
                64,
                48,
                timestamp_ms,
            )))
        }
        fn stop(&mut self) {}
        fn is_stopped(&self) -> bool {
            true
        }
    }

    struct NoFaceBackend;

    impl InferenceBackend for NoFaceBackend {
        fn load(&mut self, _config: &DetectorConfig) -> Result<(), DetectorError> {
            Ok(())
        }
        fn infer(&mut self, _frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
            Ok(None)
        }
        fn release(&mut self) {}
    }

    struct CountingSink {
        submits: usize,
    }

    impl RenderSink for CountingSink {
        fn submit_frame(
            &mut self,
            _frame: &Frame,
            _geometry: &GeometryBuffer,
        ) -> Result<(), SurfaceError> {
            self.submits += 1;
            Ok(())
        }
        fn clear(&mut self) -> Result<(), SurfaceError> {
            Ok(())
        }
        fn resize(&mut self, _logical: (f32, f32), _scale_factor: f64) {}
    }

    fn test_loop() -> FrameLoop {
        let config = DetectorConfig {
            model_asset: PathBuf::new(),
            ..DetectorConfig::default()
        };
        let worker = DetectorWorker::spawn(config, Box::new(NoFaceBackend));
        FrameLoop::new(
            FrameSource::live(Box::new(TickFeed)),
            worker,
            Box::new(CountingSink { submits: 0 }),
            GeometryMapper::new(lip_topology(), true),
        )
    }

    fn tick_until_rendered(frame_loop: &mut FrameLoop, now_ms: &mut i64) {
        for _ in 0..500 {
            *now_ms += 16;
            if matches!(frame_loop.tick(*now_ms), TickOutcome::Rendered) {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("loop never rendered");
    }

    #[test]
    fn test_idle_until_started() {
        let mut frame_loop = test_loop();
        assert_eq!(frame_loop.state(), LoopState::Idle);
        assert!(matches!(frame_loop.tick(0), TickOutcome::Inactive));
        frame_loop.start();
        assert_eq!(frame_loop.state(), LoopState::Starting);
    }

    #[test]
    fn test_stop_cancels_processing() {
        let mut frame_loop = test_loop();
        frame_loop.start();
        let mut now = 0;
        tick_until_rendered(&mut frame_loop, &mut now);

        frame_loop.stop();
        assert_eq!(frame_loop.state(), LoopState::Stopping);
        // The tick after a stop processes no frame and settles in Idle.
        assert!(matches!(frame_loop.tick(now + 16), TickOutcome::Inactive));
        assert_eq!(frame_loop.state(), LoopState::Idle);
        assert!(matches!(frame_loop.tick(now + 32), TickOutcome::Inactive));
    }

    #[test]
    fn test_missing_sink_suspends_and_resumes() {
        let mut frame_loop = test_loop();
        frame_loop.start();
        let mut now = 0;
        tick_until_rendered(&mut frame_loop, &mut now);

        let sink = frame_loop.take_sink().unwrap();
        now += 16;
        assert!(matches!(frame_loop.tick(now), TickOutcome::Waiting));
        assert_eq!(frame_loop.state(), LoopState::Suspended);

        // Retries every tick with no upper bound.
        for _ in 0..10 {
            now += 16;
            assert!(matches!(frame_loop.tick(now), TickOutcome::Waiting));
        }

        frame_loop.install_sink(sink);
        now += 16;
        assert!(matches!(frame_loop.tick(now), TickOutcome::Rendered));
        assert_eq!(frame_loop.state(), LoopState::Running);
    }

    #[test]
    fn test_shutdown_order_is_observable() {
        let mut frame_loop = test_loop();
        frame_loop.start();
        frame_loop.stop();
        frame_loop.shutdown_detector();
        frame_loop.release_source();
        assert!(frame_loop.detector_is_shut_down());
        assert!(frame_loop.source_is_released());
    }
}
