use mirror_core::{EmotionPipeline, PipelineConfig, PredictionResult};
use mirror_hw::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered predictions awaiting the consumer.
const RESULT_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] mirror_core::PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of [`EngineHandle::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The frame was handed to the worker.
    Accepted,
    /// A prediction was already running; the frame was discarded.
    Dropped,
}

/// One finished prediction.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Sequence number of the frame it was computed from.
    pub sequence: u32,
    pub result: PredictionResult,
    /// Time spent inside the pipeline.
    pub latency: Duration,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Frame>,
    busy: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Offer a frame for prediction without waiting.
    ///
    /// At most one prediction is in flight: while the worker is busy the
    /// frame is dropped, never queued.
    pub fn submit(&self, frame: Frame) -> Result<Submission, EngineError> {
        if self.tx.is_closed() {
            return Err(EngineError::ChannelClosed);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(sequence = frame.sequence, dropped, "prediction in flight; frame dropped");
            return Ok(Submission::Dropped);
        }

        match self.tx.try_send(frame) {
            Ok(()) => Ok(Submission::Accepted),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                // Unreachable while `busy` guards the single slot.
                self.busy.store(false, Ordering::Release);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sequence = frame.sequence, "engine queue full; frame dropped");
                Ok(Submission::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.busy.store(false, Ordering::Release);
                Err(EngineError::ChannelClosed)
            }
        }
    }

    /// Whether a prediction is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Frames discarded because a prediction was already running.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Clears the busy flag when a prediction ends, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Load the pipeline and spawn the engine.
///
/// Fails fast if the face detector cannot be loaded. Missing classifier
/// models only degrade predictions to Neutral.
pub fn load_engine(config: &PipelineConfig) -> Result<(EngineHandle, mpsc::Receiver<Prediction>), EngineError> {
    let pipeline = EmotionPipeline::load(config)?;
    tracing::info!(
        detector = %config.detector_model.display(),
        backend = ?pipeline.backend_kind(),
        window = config.window_size,
        "emotion pipeline loaded"
    );
    spawn_engine(pipeline)
}

/// Spawn the engine on a dedicated OS thread that owns `pipeline`.
///
/// The thread exits once every [`EngineHandle`] is dropped or the
/// prediction receiver is closed. If the pipeline panics the thread
/// unwinds, the frame channel closes and later submissions fail with
/// [`EngineError::ChannelClosed`].
pub fn spawn_engine(
    mut pipeline: EmotionPipeline,
) -> Result<(EngineHandle, mpsc::Receiver<Prediction>), EngineError> {
    let (tx, mut rx) = mpsc::channel::<Frame>(1);
    let (result_tx, result_rx) = mpsc::channel::<Prediction>(RESULT_CAPACITY);
    let busy = Arc::new(AtomicBool::new(false));
    let worker_busy = Arc::clone(&busy);

    std::thread::Builder::new()
        .name("mirror-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(frame) = rx.blocking_recv() {
                let _busy = BusyGuard(Arc::clone(&worker_busy));
                let started = Instant::now();
                let result = pipeline.predict(&frame.data, frame.width, frame.height);
                let prediction = Prediction {
                    sequence: frame.sequence,
                    result,
                    latency: started.elapsed(),
                };
                tracing::debug!(
                    sequence = prediction.sequence,
                    latency_ms = prediction.latency.as_millis() as u64,
                    result = %prediction.result,
                    "prediction finished"
                );

                if result_tx.blocking_send(prediction).is_err() {
                    // Reject further submissions before releasing the slot.
                    rx.close();
                    break;
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((
        EngineHandle {
            tx,
            busy,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        result_rx,
    ))
}
