//! Background capture thread that keeps only the most recent frame.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Consecutive capture failures tolerated before the feed gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Anything that can produce frames in a blocking loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Continuously captures frames on a dedicated thread.
///
/// Readers always see the latest frame; older frames are overwritten, never
/// queued. Stopping joins the thread and also happens on drop.
pub struct CameraFeed {
    device_path: String,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraFeed {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Open the configured V4L2 device and begin capturing.
    ///
    /// A no-op while already running. Device errors surface here rather than
    /// on the capture thread.
    pub fn start(&mut self) -> Result<(), CameraError> {
        if self.is_running() {
            return Ok(());
        }
        let camera = Camera::open(&self.device_path)?;
        tracing::info!(
            device = %self.device_path,
            width = camera.width,
            height = camera.height,
            "camera feed starting"
        );
        self.spawn(move |running, latest| match camera.stream() {
            Ok(mut session) => capture_loop(&mut session, running, latest),
            Err(e) => tracing::error!(error = %e, "failed to start capture stream"),
        })
    }

    /// Begin capturing from an arbitrary source. A no-op while already running.
    pub fn start_with<S>(&mut self, mut source: S) -> Result<(), CameraError>
    where
        S: FrameSource + Send + 'static,
    {
        if self.is_running() {
            return Ok(());
        }
        self.spawn(move |running, latest| capture_loop(&mut source, running, latest))
    }

    fn spawn<F>(&mut self, body: F) -> Result<(), CameraError>
    where
        F: FnOnce(&AtomicBool, &Mutex<Option<Frame>>) + Send + 'static,
    {
        // Reap a worker that exited on its own.
        self.stop();
        if let Ok(mut slot) = self.latest.lock() {
            *slot = None;
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let latest = Arc::clone(&self.latest);

        let handle = std::thread::Builder::new()
            .name("mirror-capture".into())
            .spawn(move || {
                tracing::debug!("capture thread started");
                body(&running, &latest);
                running.store(false, Ordering::SeqCst);
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}"))
            })?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Signal the capture thread to finish and wait for it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
            tracing::info!(device = %self.device_path, "camera feed stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A copy of the most recent frame, or `None` before the first capture.
    pub fn get_frame(&self) -> Option<Frame> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: FrameSource + ?Sized>(source: &mut S, running: &AtomicBool, latest: &Mutex<Option<Frame>>) {
    let mut consecutive_errors = 0u32;
    while running.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                if let Ok(mut slot) = latest.lock() {
                    *slot = Some(frame);
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(error = %e, consecutive_errors, "frame capture failed");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!("too many consecutive capture failures; stopping feed");
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
