//! Detector worker thread.
//!
//! Owns the [`LandmarkDetector`] on a dedicated thread so the frame loop
//! never blocks on inference. The mailbox holds at most one job: while a
//! detection is in flight the loop's submission fails and that tick skips
//! detection instead of queueing it.

use super::{DetectionResult, InferenceBackend, LandmarkDetector};
use crate::capture::Frame;
use crate::config::DetectorConfig;
use crate::error::DetectorError;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Detection job for one frame tick.
pub enum DetectJob {
    /// Streaming detection with a monotonic timestamp.
    Video { frame: Frame, timestamp_ms: i64 },
    /// Single-shot detection on a still image.
    Still { frame: Frame },
}

/// Events reported back to the frame loop.
pub enum WorkerEvent {
    /// Model load finished; the worker accepts jobs.
    Ready,
    /// Model load failed; the worker has exited.
    LoadFailed(DetectorError),
    /// A submitted job completed.
    Result(DetectionResult),
    /// A submitted job failed (per-frame error; the loop logs and skips).
    Error(DetectorError),
}

/// Handle to the worker thread. Dropping (or calling [`shutdown`]) closes
/// the detector and joins the thread.
///
/// [`shutdown`]: DetectorWorker::shutdown
pub struct DetectorWorker {
    job_tx: Option<SyncSender<DetectJob>>,
    event_rx: Receiver<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
}

impl DetectorWorker {
    /// Spawn the worker; the detector (including its one-time model load)
    /// is created on the worker thread and readiness is reported through
    /// [`WorkerEvent::Ready`] / [`WorkerEvent::LoadFailed`].
    pub fn spawn(config: DetectorConfig, backend: Box<dyn InferenceBackend>) -> Self {
        // One slot: a second submission while a job is in flight must fail.
        let (job_tx, job_rx) = mpsc::sync_channel::<DetectJob>(1);
        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);

        let thread = std::thread::Builder::new()
            .name("rouge-detector".into())
            .spawn(move || {
                let mut detector = match LandmarkDetector::create(config, backend) {
                    Ok(detector) => {
                        let _ = event_tx.send(WorkerEvent::Ready);
                        detector
                    }
                    Err(e) => {
                        let _ = event_tx.send(WorkerEvent::LoadFailed(e));
                        return;
                    }
                };

                // Runs until the job sender is dropped by shutdown().
                while let Ok(job) = job_rx.recv() {
                    let outcome = match job {
                        DetectJob::Video {
                            frame,
                            timestamp_ms,
                        } => detector.detect_video(&frame, timestamp_ms),
                        DetectJob::Still { frame } => detector.detect_still(&frame),
                    };
                    let event = match outcome {
                        Ok(result) => WorkerEvent::Result(result),
                        Err(e) => WorkerEvent::Error(e),
                    };
                    worker_pending.fetch_sub(1, Ordering::SeqCst);
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                detector.close();
            })
            .expect("failed to spawn detector worker thread");

        Self {
            job_tx: Some(job_tx),
            event_rx,
            thread: Some(thread),
            pending,
        }
    }

    /// Submit a job unless one is already in flight. Returns `false` when
    /// a previous job has not completed yet (the caller skips detection for
    /// this tick) or the worker has exited.
    pub fn try_submit(&self, job: DetectJob) -> bool {
        if self.pending.load(Ordering::SeqCst) > 0 {
            return false;
        }
        match &self.job_tx {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => {
                    self.pending.fetch_add(1, Ordering::SeqCst);
                    true
                }
                Err(TrySendError::Full(_)) => false,
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Drain one pending event, if any. Never blocks.
    pub fn poll(&self) -> Option<WorkerEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Close the detector and join the worker thread. Idempotent; any job
    /// still in flight completes first, so the detector's resources are
    /// released exactly once.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("detector worker panicked during shutdown");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceLandmarks;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowBackend {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl InferenceBackend for SlowBackend {
        fn load(&mut self, _config: &DetectorConfig) -> Result<(), DetectorError> {
            Ok(())
        }

        fn infer(&mut self, _frame: &Frame) -> Result<Option<FaceLandmarks>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(None)
        }

        fn release(&mut self) {}
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            model_asset: PathBuf::new(),
            ..DetectorConfig::default()
        }
    }

    fn test_frame() -> Frame {
        Frame::from_rgba(vec![0u8; 16], 2, 2, 0)
    }

    fn wait_ready(worker: &DetectorWorker) {
        for _ in 0..200 {
            if let Some(WorkerEvent::Ready) = worker.poll() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("worker never became ready");
    }

    #[test]
    fn test_ready_then_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = DetectorWorker::spawn(
            test_config(),
            Box::new(SlowBackend {
                calls: Arc::clone(&calls),
                delay: Duration::from_millis(1),
            }),
        );
        wait_ready(&worker);
        assert!(worker.try_submit(DetectJob::Video {
            frame: test_frame(),
            timestamp_ms: 0,
        }));
        let mut got_result = false;
        for _ in 0..200 {
            if let Some(WorkerEvent::Result(_)) = worker.poll() {
                got_result = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(got_result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }

    #[test]
    fn test_load_failure_reported() {
        struct FailingBackend;
        impl InferenceBackend for FailingBackend {
            fn load(&mut self, _config: &DetectorConfig) -> Result<(), DetectorError> {
                Err(DetectorError::UnsupportedDelegate("no gpu".into()))
            }
            fn infer(
                &mut self,
                _frame: &Frame,
            ) -> Result<Option<FaceLandmarks>, DetectorError> {
                unreachable!()
            }
            fn release(&mut self) {}
        }

        let worker = DetectorWorker::spawn(test_config(), Box::new(FailingBackend));
        let mut failed = false;
        for _ in 0..200 {
            if let Some(WorkerEvent::LoadFailed(e)) = worker.poll() {
                assert_eq!(e, DetectorError::UnsupportedDelegate("no gpu".into()));
                failed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(failed);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut worker = DetectorWorker::spawn(
            test_config(),
            Box::new(SlowBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }),
        );
        wait_ready(&worker);
        worker.shutdown();
        worker.shutdown();
        assert!(worker.is_shut_down());
        assert!(!worker.try_submit(DetectJob::Still {
            frame: test_frame()
        }));
    }
}
