//! Periodic aggregation.
//!
//! [`AggregationSchedule`] is the pure part: given "now" it says whether a
//! pass is due. [`LearnerWorker`] is the thread that polls it against the
//! engine's clock.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::engine::MirrorLoop;

/// Fixed-interval deadline tracker.
///
/// The first pass is due one full interval after the first poll. Missed
/// deadlines collapse into a single pass.
#[derive(Debug, Clone)]
pub struct AggregationSchedule {
    interval_ms: u64,
    next_due_ms: Option<i64>,
}

impl AggregationSchedule {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn next_due_ms(&self) -> Option<i64> {
        self.next_due_ms
    }

    /// Returns true when a pass should run at `now_ms` and arms the next one.
    pub fn poll(&mut self, now_ms: i64) -> bool {
        let interval = self.interval_ms as i64;
        match self.next_due_ms {
            None => {
                self.next_due_ms = Some(now_ms.saturating_add(interval));
                false
            }
            Some(due) if now_ms >= due => {
                self.next_due_ms = Some(now_ms.saturating_add(interval));
                true
            }
            Some(_) => false,
        }
    }
}

/// Background thread driving [`MirrorLoop::run_scheduled`].
///
/// The thread wakes every `tick`, so the effective pass period is the
/// configured interval rounded up to the tick.
pub struct LearnerWorker {
    shutdown_tx: Sender<()>,
    passes: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LearnerWorker {
    pub fn spawn(mirror: Arc<MirrorLoop>, tick: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let passes = Arc::new(AtomicU64::new(0));
        let passes_clone = Arc::clone(&passes);

        let handle = thread::Builder::new()
            .name("mirror-learner".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        if mirror.run_scheduled().is_some() {
                            passes_clone.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::error!("failed to spawn mirror learner thread: {}", e);
                None
            }
        };

        Self {
            shutdown_tx,
            passes,
            handle,
        }
    }

    /// Scheduled passes that have run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LearnerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LearnerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnerWorker")
            .field("passes", &self.passes())
            .field("running", &self.is_running())
            .finish()
    }
}
