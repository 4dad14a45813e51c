//! Event processing worker
//!
//! [`EventProcessingPipeline`] owns the source, the builder and the processor
//! chain of one session and runs them on a dedicated OS thread, since reads may
//! block indefinitely. The control side keeps a [`PipelineHandle`] to ask the
//! loop to stop and to learn how it ended.

use crate::builder::EventBuilder;
use crate::config::SessionConfig;
use crate::error::{ProcessingError, SetupError};
use crate::processor::{panic_message, ProcessorChain};
use crate::session::pause::{PauseController, Turn};
use crate::session::stats::SessionStatistics;
use crate::source::{EventSource, SourceRead};
use crate::types::Record;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why the worker loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExit {
    /// The source reported end of stream
    SourceExhausted,
    /// The control side asked the loop to stop
    FinishRequested,
    /// `max_events` events were processed
    EventLimit,
    /// An end-of-run event was processed with `disconnect_on_end_run` set
    EndOfRun,
    /// An error ended the loop
    Fatal(ProcessingError),
}

impl PipelineExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineExit::Fatal(_))
    }

    pub fn error(&self) -> Option<&ProcessingError> {
        match self {
            PipelineExit::Fatal(error) => Some(error),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineExit::SourceExhausted => write!(f, "end of data"),
            PipelineExit::FinishRequested => write!(f, "finish requested"),
            PipelineExit::EventLimit => write!(f, "event limit reached"),
            PipelineExit::EndOfRun => write!(f, "end of run"),
            PipelineExit::Fatal(error) => write!(f, "{}", error),
        }
    }
}

/// State shared between the worker thread and its handle
#[derive(Debug)]
struct Shared {
    finish: AtomicBool,
    exit: Mutex<Option<PipelineExit>>,
    stats: Arc<SessionStatistics>,
    pause: Arc<PauseController>,
}

impl Shared {
    fn finish_requested(&self) -> bool {
        self.finish.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct Policy {
    disconnect_on_error: bool,
    disconnect_on_end_run: bool,
    max_events: Option<u64>,
}

/// One session's source, builder and processors, ready to run
pub struct EventProcessingPipeline {
    source: Box<dyn EventSource>,
    builder: Box<dyn EventBuilder>,
    chain: ProcessorChain,
    pause: Arc<PauseController>,
    policy: Policy,
}

impl EventProcessingPipeline {
    pub fn new(
        source: Box<dyn EventSource>,
        builder: Box<dyn EventBuilder>,
        chain: ProcessorChain,
        pause: Arc<PauseController>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            source,
            builder,
            chain,
            pause,
            policy: Policy {
                disconnect_on_error: config.disconnect_on_error,
                disconnect_on_end_run: config.disconnect_on_end_run,
                max_events: config.max_events,
            },
        }
    }

    /// Spawn the worker thread and return immediately
    pub fn start(self) -> Result<PipelineHandle, SetupError> {
        let shared = Arc::new(Shared {
            finish: AtomicBool::new(false),
            exit: Mutex::new(None),
            stats: Arc::new(SessionStatistics::new()),
            pause: Arc::clone(&self.pause),
        });
        let (done_tx, done_rx) = watch::channel(false);

        let mut worker = Worker {
            source: self.source,
            builder: self.builder,
            chain: self.chain,
            policy: self.policy,
            shared: Arc::clone(&shared),
        };
        let span = tracing::Span::current();

        thread::Builder::new()
            .name("event-processing".to_string())
            .spawn(move || {
                let _entered = span.enter();
                let exit = match panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
                    Ok(exit) => exit,
                    Err(payload) => {
                        let error = ProcessingError::WorkerPanicked {
                            reason: panic_message(payload.as_ref()),
                        };
                        worker.shared.stats.record_error(error.clone());
                        PipelineExit::Fatal(error)
                    }
                };

                info!(
                    exit = %exit,
                    events = worker.shared.stats.events_consumed(),
                    "Event processing stopped"
                );
                worker.shared.stats.mark_stopped();
                *worker
                    .shared
                    .exit
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(exit);
                // Published last: whoever sees `done` also sees the exit and last error
                done_tx.send_replace(true);
            })
            .map_err(|e| SetupError::WorkerSpawn {
                reason: e.to_string(),
            })?;

        Ok(PipelineHandle {
            shared,
            done: done_rx,
        })
    }
}

struct Worker {
    source: Box<dyn EventSource>,
    builder: Box<dyn EventBuilder>,
    chain: ProcessorChain,
    policy: Policy,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(&mut self) -> PipelineExit {
        info!(processors = ?self.chain.names(), "Event processing started");

        if let Err(e) = self.chain.start_session() {
            let error = ProcessingError::Step(e);
            self.shared.stats.record_error(error.clone());
            self.chain.end_session();
            return PipelineExit::Fatal(error);
        }

        let exit = self.consume();
        self.chain.end_session();
        exit
    }

    fn consume(&mut self) -> PipelineExit {
        loop {
            if self.shared.finish_requested() {
                return PipelineExit::FinishRequested;
            }

            let mut stepped = match self.shared.pause.wait_turn() {
                Turn::Halt => return PipelineExit::FinishRequested,
                Turn::Proceed { stepped } => stepped,
            };

            let record = match self.source.next_record() {
                Ok(SourceRead::Record(record)) => record,
                Ok(SourceRead::Idle) => {
                    if stepped {
                        self.shared.pause.restore_step();
                    }
                    continue;
                }
                Ok(SourceRead::End) => return PipelineExit::SourceExhausted,
                Err(_) if self.shared.finish_requested() => {
                    return PipelineExit::FinishRequested;
                }
                Err(e) => {
                    let error = ProcessingError::Source {
                        reason: e.to_string(),
                    };
                    self.shared.stats.record_error(error.clone());
                    return PipelineExit::Fatal(error);
                }
            };

            // A pause may have arrived while the read was blocked
            if !stepped {
                match self.shared.pause.wait_turn() {
                    Turn::Halt => return PipelineExit::FinishRequested,
                    Turn::Proceed { stepped: granted } => stepped = granted,
                }
            }

            if stepped {
                debug!(record = record.id, "Stepping one event");
            }

            if let ControlFlow::Break(exit) = self.handle(&record) {
                return exit;
            }
        }
    }

    fn handle(&mut self, record: &Record) -> ControlFlow<PipelineExit> {
        let event = match self.builder.build(record) {
            Ok(event) => event,
            Err(e) => return self.fail(e.into()),
        };

        if let Err(e) = self.chain.process(&event) {
            return self.fail(e.into());
        }

        let stats = &self.shared.stats;
        stats.record_event(record.len());

        if self.policy.disconnect_on_end_run && event.is_end_of_run() {
            info!(run = ?event.run, "End of run received");
            return ControlFlow::Break(PipelineExit::EndOfRun);
        }
        if let Some(max) = self.policy.max_events {
            if stats.events_consumed() >= max {
                return ControlFlow::Break(PipelineExit::EventLimit);
            }
        }
        ControlFlow::Continue(())
    }

    fn fail(&self, error: ProcessingError) -> ControlFlow<PipelineExit> {
        warn!(error = %error, "Event processing error");
        self.shared.stats.record_error(error.clone());
        if self.policy.disconnect_on_error {
            ControlFlow::Break(PipelineExit::Fatal(error))
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Control-side view of a running pipeline
#[derive(Debug)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    done: watch::Receiver<bool>,
}

impl PipelineHandle {
    /// Ask the loop to stop after the current event
    ///
    /// Also wakes a worker blocked in a pause wait.
    pub fn request_finish(&self) {
        self.shared.finish.store(true, Ordering::Release);
        self.shared.pause.halt();
    }

    /// The most recent processing error, if any
    pub fn last_error(&self) -> Option<ProcessingError> {
        self.shared.stats.last_error()
    }

    /// How the loop ended, once it has
    pub fn exit(&self) -> Option<PipelineExit> {
        self.shared
            .exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statistics(&self) -> Arc<SessionStatistics> {
        Arc::clone(&self.shared.stats)
    }

    /// A future-friendly signal that resolves when the worker is done
    pub fn completion(&self) -> PipelineCompletion {
        PipelineCompletion {
            done: self.done.clone(),
        }
    }

    /// Wait up to `timeout` for the worker. Returns whether it finished.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let mut completion = self.completion();
        tokio::time::timeout(timeout, completion.wait()).await.is_ok()
    }
}

/// Resolves once the worker thread has recorded its exit
#[derive(Debug, Clone)]
pub struct PipelineCompletion {
    done: watch::Receiver<bool>,
}

impl PipelineCompletion {
    pub async fn wait(&mut self) {
        // A dropped sender also means the worker is gone
        let _ = self.done.wait_for(|done| *done).await;
    }
}
