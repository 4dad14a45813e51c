//! Session orchestration
//!
//! [`SessionController`] is configured once and then spawned as a tokio task
//! that owns the active session. Every operator command and every watchdog
//! notification is a message on one channel, so lifecycle transitions are
//! processed strictly one at a time and an operator disconnect can never
//! interleave with an automatic one. [`SessionHandle`] is the cloneable
//! control surface that sends those messages and awaits their replies.

use crate::builder::BuilderRegistry;
use crate::config::{ControllerSettings, SessionConfig};
use crate::error::{ProcessingError, SessionError, SetupError};
use crate::processor::ProcessorChain;
use crate::session::pause::PauseController;
use crate::session::pipeline::{EventProcessingPipeline, PipelineExit, PipelineHandle};
use crate::session::stats::{ProcessingStatistics, SessionStatistics};
use crate::session::status::{ConnectionStatus, StatusBoard, StatusChange};
use crate::session::watchdog::WatchdogMonitor;
use crate::source::{DefaultSourceOpener, SourceCloser, SourceOpener};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Why a session is being torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The operator asked for it
    Operator,
    /// The worker stopped on its own
    Watchdog(PipelineExit),
}

impl DisconnectReason {
    /// Cause to report with an `Error` status, if the session failed
    fn failure_cause(&self) -> Option<String> {
        match self {
            DisconnectReason::Watchdog(exit) if exit.is_failure() => Some(exit.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Operator => write!(f, "operator request"),
            DisconnectReason::Watchdog(exit) => write!(f, "worker stopped: {}", exit),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Messages processed by the controller task
#[derive(Debug)]
enum SessionCommand {
    Connect {
        config: Box<SessionConfig>,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    /// Sent by a session's watchdog; `session` guards against stale notices
    WorkerFinished {
        session: u64,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Step {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

type ProcessorFactory = Box<dyn Fn(&SessionConfig) -> ProcessorChain + Send + Sync>;

/// Statistics of the current or most recent session
type StatsSlot = Arc<Mutex<Option<Arc<SessionStatistics>>>>;

/// Builds the session controller task
pub struct SessionController {
    settings: ControllerSettings,
    opener: Arc<dyn SourceOpener>,
    builders: BuilderRegistry,
    processors: ProcessorFactory,
}

impl SessionController {
    /// A controller using the built-in sources and builders and no processors
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            opener: Arc::new(DefaultSourceOpener),
            builders: BuilderRegistry::with_defaults(),
            processors: Box::new(|_| ProcessorChain::new()),
        }
    }

    /// Replace how data sources are opened
    pub fn with_source_opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    pub fn with_builders(mut self, builders: BuilderRegistry) -> Self {
        self.builders = builders;
        self
    }

    /// Set the factory that creates each session's processor chain
    pub fn with_processors<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SessionConfig) -> ProcessorChain + Send + Sync + 'static,
    {
        self.processors = Box::new(factory);
        self
    }

    /// Start the controller task. Must be called within a tokio runtime.
    ///
    /// The task runs until [`SessionHandle::shutdown`] is called or every
    /// handle has been dropped; either way an active session is disconnected.
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let board = Arc::new(StatusBoard::new());
        let stats: StatsSlot = Arc::new(Mutex::new(None));

        let actor = Actor {
            settings: self.settings,
            opener: self.opener,
            builders: self.builders,
            processors: self.processors,
            board: Arc::clone(&board),
            stats: Arc::clone(&stats),
            commands: commands.downgrade(),
            active: None,
            next_session: 1,
        };
        tokio::spawn(actor.run(rx));

        SessionHandle {
            commands,
            board,
            stats,
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("settings", &self.settings)
            .field("builders", &self.builders)
            .finish()
    }
}

struct ActiveSession {
    id: u64,
    pipeline: PipelineHandle,
    pause: Arc<PauseController>,
    watchdog: Option<WatchdogMonitor>,
    closer: SourceCloser,
}

struct Actor {
    settings: ControllerSettings,
    opener: Arc<dyn SourceOpener>,
    builders: BuilderRegistry,
    processors: ProcessorFactory,
    board: Arc<StatusBoard>,
    stats: StatsSlot,
    commands: mpsc::WeakUnboundedSender<SessionCommand>,
    active: Option<ActiveSession>,
    next_session: u64,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!("Session controller started");

        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Connect { config, reply } => {
                    let result = self.connect(*config).await;
                    let _ = reply.send(result);
                }
                SessionCommand::Disconnect { reply } => {
                    let result = if self.active.is_some() {
                        self.disconnect(DisconnectReason::Operator).await;
                        Ok(())
                    } else {
                        Err(SessionError::NotConnected {
                            status: self.board.current_status(),
                        })
                    };
                    let _ = reply.send(result);
                }
                SessionCommand::WorkerFinished { session } => {
                    self.worker_finished(session).await;
                }
                SessionCommand::Pause { reply } => {
                    let _ = reply.send(self.pause());
                }
                SessionCommand::Resume { reply } => {
                    let _ = reply.send(self.resume());
                }
                SessionCommand::Step { reply } => {
                    let _ = reply.send(self.step());
                }
                SessionCommand::Shutdown { reply } => {
                    self.disconnect(DisconnectReason::Operator).await;
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }

        // Every handle dropped without a shutdown
        self.disconnect(DisconnectReason::Operator).await;
        debug!("Session controller stopped");
    }

    fn set_status(&self, status: ConnectionStatus, cause: Option<String>) {
        if let Err(e) = self.board.set_status(status, cause) {
            warn!(error = %e, "Status change rejected");
        }
    }

    #[tracing::instrument(
        skip(self, config),
        fields(source = %config.source, detector = %config.detector, session)
    )]
    async fn connect(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        let status = self.board.current_status();
        if self.active.is_some() || !status.is_terminal() {
            return Err(SessionError::AlreadyActive { status });
        }
        config.validate()?;

        self.set_status(ConnectionStatus::ConnectionRequested, None);

        let builder = match self.builders.create(&config) {
            Ok(builder) => builder,
            Err(e) => return Err(self.fail_setup(e)),
        };

        self.set_status(ConnectionStatus::Connecting, None);

        let opener = Arc::clone(&self.opener);
        let source_kind = config.source.clone();
        let open = tokio::task::spawn_blocking(move || opener.open(&source_kind));

        let source = match tokio::time::timeout(self.settings.connect_timeout(), open).await {
            Ok(Ok(Ok(source))) => source,
            Ok(Ok(Err(e))) => return Err(self.fail_setup(e)),
            Ok(Err(join_error)) => {
                return Err(self.fail_setup(SetupError::SourceUnavailable {
                    reason: join_error.to_string(),
                }))
            }
            Err(_) => {
                // The blocking open keeps running; a source it returns late is dropped
                self.set_status(ConnectionStatus::TimedOut, None);
                return Err(self.fail_setup(SetupError::Timeout {
                    millis: self.settings.connect_timeout_ms,
                }));
            }
        };

        let closer = source.closer();
        let pause = Arc::new(PauseController::new(config.pause_at_start));
        let chain = (self.processors)(&config);
        let pipeline =
            EventProcessingPipeline::new(source, builder, chain, Arc::clone(&pause), &config);

        let id = self.next_session;
        self.next_session += 1;
        tracing::Span::current().record("session", id);

        let pipeline = match pipeline.start() {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(close_error) = closer.close() {
                    warn!(error = %close_error, "Failed to close data source");
                }
                return Err(self.fail_setup(e));
            }
        };

        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(pipeline.statistics());

        let notify = self.commands.clone();
        let watchdog = WatchdogMonitor::start(pipeline.completion(), move || {
            if let Some(commands) = notify.upgrade() {
                let _ = commands.send(SessionCommand::WorkerFinished { session: id });
            }
        });

        self.active = Some(ActiveSession {
            id,
            pipeline,
            pause: Arc::clone(&pause),
            watchdog: Some(watchdog),
            closer,
        });

        self.set_status(ConnectionStatus::Connected, None);
        if pause.is_paused() {
            self.set_status(ConnectionStatus::Sleeping, None);
        }
        info!(paused = config.pause_at_start, "Session connected");
        Ok(())
    }

    /// Report a setup failure and return to `Disconnected`
    fn fail_setup(&self, e: SetupError) -> SessionError {
        error!(error = %e, "Session setup failed");
        self.set_status(ConnectionStatus::Error, Some(e.to_string()));
        self.set_status(ConnectionStatus::Disconnected, None);
        SessionError::Setup(e)
    }

    /// Tear down the active session, if any
    #[tracing::instrument(skip(self, reason), fields(reason = %reason))]
    async fn disconnect(&mut self, reason: DisconnectReason) {
        let Some(mut session) = self.active.take() else {
            return;
        };

        // A watchdog-triggered disconnect comes from a watchdog that has already fired
        if let (DisconnectReason::Operator, Some(watchdog)) = (&reason, session.watchdog.take()) {
            watchdog.cancel().await;
        }

        self.set_status(ConnectionStatus::DisconnectRequested, None);
        session.pipeline.request_finish();

        let join_timeout = self.settings.join_timeout();
        if !session.pipeline.wait_finished(join_timeout).await {
            warn!(
                session = session.id,
                timeout_ms = self.settings.join_timeout_ms,
                "Worker did not stop in time, closing the source under it (zombie worker)"
            );
        }

        self.set_status(ConnectionStatus::Disconnecting, None);
        if let Err(e) = session.closer.close() {
            warn!(session = session.id, error = %e, "Failed to close data source");
        }
        session.pause.reset();

        let stats = session.pipeline.statistics();
        match reason.failure_cause() {
            Some(cause) => {
                error!(session = session.id, cause = %cause, "Session ended with error");
                self.set_status(ConnectionStatus::Error, Some(cause));
            }
            None => self.set_status(ConnectionStatus::Disconnected, None),
        }
        info!(
            session = session.id,
            events = stats.events_consumed(),
            errors = stats.error_count(),
            "Session disconnected"
        );
    }

    async fn worker_finished(&mut self, session: u64) {
        let exit = match &self.active {
            Some(active) if active.id == session => active.pipeline.exit(),
            _ => {
                debug!(session, "Ignoring notice from a finished session");
                return;
            }
        };
        let exit = recorded_exit(exit);
        info!(session, exit = %exit, "Worker stopped, disconnecting");
        self.disconnect(DisconnectReason::Watchdog(exit)).await;
    }

    fn active_pause(&self) -> Result<Arc<PauseController>, SessionError> {
        let status = self.board.current_status();
        match &self.active {
            Some(session) if status.is_session_active() => Ok(Arc::clone(&session.pause)),
            _ => Err(SessionError::NotConnected { status }),
        }
    }

    fn pause(&self) -> Result<(), SessionError> {
        if self.active_pause()?.pause() {
            info!("Event processing paused");
            self.set_status(ConnectionStatus::Sleeping, None);
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), SessionError> {
        if self.active_pause()?.resume() {
            info!("Event processing resumed");
            self.set_status(ConnectionStatus::Connected, None);
        }
        Ok(())
    }

    fn step(&self) -> Result<(), SessionError> {
        if self.active_pause()?.step() {
            debug!("Single event step requested");
            Ok(())
        } else {
            Err(SessionError::NotPaused)
        }
    }
}

/// Cloneable control surface of a [`SessionController`]
///
/// Commands are queued to the controller task and resolve when it has
/// processed them. Status reads go straight to the status board.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    board: Arc<StatusBoard>,
    stats: StatsSlot,
}

impl SessionHandle {
    async fn request<F>(&self, command: F) -> Result<(), SessionError>
    where
        F: FnOnce(Reply<()>) -> SessionCommand,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::ControllerStopped)?;
        response.await.map_err(|_| SessionError::ControllerStopped)?
    }

    /// Start a session; resolves once the worker is running or setup failed
    pub async fn connect(&self, config: SessionConfig) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Connect {
            config: Box::new(config),
            reply,
        })
        .await
    }

    /// Stop the active session; resolves once it is torn down
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Resume { reply }).await
    }

    /// Process exactly one more event while paused
    pub async fn step(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Step { reply }).await
    }

    /// Disconnect any active session and stop the controller task
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.board.current_status()
    }

    /// The last status transition with its timestamp and cause
    pub fn current(&self) -> StatusChange {
        self.board.current()
    }

    /// Most recent transition to `Error`
    pub fn last_failure(&self) -> Option<StatusChange> {
        self.board.last_failure()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusChange> {
        self.board.subscribe()
    }

    /// Register a synchronous status observer
    ///
    /// Observers run on the thread that changes the status and must not block.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.board.observe(observer);
    }

    /// Statistics of the current session, or of the last one after it ended
    pub fn statistics(&self) -> Option<ProcessingStatistics> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|stats| stats.snapshot())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &self.current_status())
            .finish()
    }
}

/// Exit of a worker that signalled completion, or a failure if it died
/// before recording one
fn recorded_exit(exit: Option<PipelineExit>) -> PipelineExit {
    exit.unwrap_or_else(|| {
        PipelineExit::Fatal(ProcessingError::WorkerPanicked {
            reason: "worker stopped without recording an exit".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_cause() {
        assert_eq!(DisconnectReason::Operator.failure_cause(), None);
        assert_eq!(
            DisconnectReason::Watchdog(PipelineExit::SourceExhausted).failure_cause(),
            None
        );
        let fatal = PipelineExit::Fatal(crate::error::ProcessingError::Source {
            reason: "connection reset".to_string(),
        });
        assert_eq!(
            DisconnectReason::Watchdog(fatal).failure_cause().as_deref(),
            Some("Data source read failed: connection reset")
        );
    }

    #[test]
    fn test_missing_exit_is_a_failure() {
        assert_eq!(recorded_exit(Some(PipelineExit::EndOfRun)), PipelineExit::EndOfRun);

        let exit = recorded_exit(None);
        assert!(exit.is_failure());
        let cause = DisconnectReason::Watchdog(exit).failure_cause().unwrap();
        assert!(cause.contains("worker stopped without recording an exit"), "{}", cause);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(DisconnectReason::Operator.to_string(), "operator request");
        assert_eq!(
            DisconnectReason::Watchdog(PipelineExit::EventLimit).to_string(),
            "worker stopped: event limit reached"
        );
    }
}
