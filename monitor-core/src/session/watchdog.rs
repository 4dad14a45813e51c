//! Watchdog over the event processing worker
//!
//! Turns "the worker stopped" into a single callback, typically an automatic
//! disconnect. The callback runs at most once: firing and cancelling race on
//! one atomic, and whichever side wins decides the outcome.

use crate::session::pipeline::PipelineCompletion;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Supervises one pipeline and reports its termination once
#[derive(Debug)]
pub struct WatchdogMonitor {
    token: CancellationToken,
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl WatchdogMonitor {
    /// Spawn the supervisory task
    ///
    /// `on_finished` is called once the worker terminates, unless the watchdog
    /// is cancelled first. Must be called within a tokio runtime.
    pub fn start<F>(mut completion: PipelineCompletion, on_finished: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(ARMED));

        let task = tokio::spawn({
            let token = token.clone();
            let state = Arc::clone(&state);
            async move {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        debug!("Watchdog cancelled");
                    }

                    _ = completion.wait() => {
                        if state
                            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            debug!("Worker terminated, watchdog firing");
                            on_finished();
                        }
                    }
                }
            }
        });

        Self {
            token,
            state,
            task: Some(task),
        }
    }

    /// Stop watching without calling `on_finished`
    ///
    /// Returns true if this call prevented the callback. When it returns
    /// false the callback has already completed.
    pub async fn cancel(mut self) -> bool {
        let prevented = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        prevented
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

impl Drop for WatchdogMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
