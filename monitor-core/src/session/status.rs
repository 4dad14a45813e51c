//! Connection status tracking
//!
//! [`StatusBoard`] holds the authoritative [`ConnectionStatus`] of a
//! controller. Writers are serialized by a single lock that is held only for
//! the update and the synchronous observer callbacks. The value itself lives
//! in a `watch` channel, so readers (including observers running inside a
//! notification) never contend with that lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// Connection status of the monitoring session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No session
    #[default]
    Disconnected,
    /// Source setup in progress
    Connecting,
    /// Operator asked to connect
    ConnectionRequested,
    /// Session running
    Connected,
    /// Session running but paused
    Sleeping,
    /// Source setup exceeded its time limit
    TimedOut,
    /// Teardown in progress
    Disconnecting,
    /// Disconnect accepted, teardown about to start
    DisconnectRequested,
    /// Session failed
    Error,
}

impl ConnectionStatus {
    /// Statuses a session may come to rest in
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }

    pub fn is_disconnect_in_flight(self) -> bool {
        matches!(
            self,
            ConnectionStatus::DisconnectRequested | ConnectionStatus::Disconnecting
        )
    }

    /// Statuses in which pause, resume and step are accepted
    pub fn is_session_active(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Sleeping)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::ConnectionRequested => "connection requested",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Sleeping => "sleeping",
            ConnectionStatus::TimedOut => "timed out",
            ConnectionStatus::Disconnecting => "disconnecting",
            ConnectionStatus::DisconnectRequested => "disconnect requested",
            ConnectionStatus::Error => "error",
        };
        f.write_str(text)
    }
}

/// A recorded status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: ConnectionStatus,
    pub at: DateTime<Utc>,
    /// Human-readable cause, always present for [`ConnectionStatus::Error`]
    pub cause: Option<String>,
}

impl StatusChange {
    fn now(status: ConnectionStatus, cause: Option<String>) -> Self {
        Self {
            status,
            at: Utc::now(),
            cause,
        }
    }
}

/// Rejected status transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("Cannot move from {from} to {to} while a disconnect is in flight")]
    DisconnectInFlight {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

type Observer = Arc<dyn Fn(&StatusChange) + Send + Sync>;

/// Authoritative connection status with synchronous observers
pub struct StatusBoard {
    /// Serializes writers for the update and the notification round
    writer: Mutex<()>,
    observers: Mutex<Vec<Observer>>,
    last_failure: Mutex<Option<StatusChange>>,
    current: watch::Sender<StatusChange>,
}

impl StatusBoard {
    /// Create a board in the `Disconnected` status
    pub fn new() -> Self {
        let (current, _) = watch::channel(StatusChange::now(ConnectionStatus::Disconnected, None));
        Self {
            writer: Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            last_failure: Mutex::new(None),
            current,
        }
    }

    /// Record a new status and notify observers in registration order
    ///
    /// Setting the current status again is a no-op and returns `Ok(false)`.
    /// While a disconnect is in flight only `Disconnecting` and the terminal
    /// statuses are accepted. Observers may read the board and register
    /// further observers, but must not call `set_status` themselves.
    pub fn set_status(
        &self,
        status: ConnectionStatus,
        cause: Option<String>,
    ) -> Result<bool, StatusError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.current.borrow().status;
        if previous == status {
            return Ok(false);
        }
        if previous.is_disconnect_in_flight()
            && !(status.is_terminal() || status == ConnectionStatus::Disconnecting)
        {
            return Err(StatusError::DisconnectInFlight {
                from: previous,
                to: status,
            });
        }

        let change = StatusChange::now(status, cause);
        debug!(from = %previous, to = %status, cause = ?change.cause, "Status changed");

        if status == ConnectionStatus::Error {
            *self
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(change.clone());
        }
        self.current.send_replace(change.clone());

        // Observers run without the list locked
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer(&change);
        }
        Ok(true)
    }

    /// The last status set
    pub fn current_status(&self) -> ConnectionStatus {
        self.current.borrow().status
    }

    /// The last transition, with its timestamp and cause
    pub fn current(&self) -> StatusChange {
        self.current.borrow().clone()
    }

    /// The most recent transition to `Error`, kept after the session moves on
    pub fn last_failure(&self) -> Option<StatusChange> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a synchronous observer
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Receiver that always holds the latest transition
    pub fn subscribe(&self) -> watch::Receiver<StatusChange> {
        self.current.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBoard")
            .field("current", &self.current_status())
            .finish()
    }
}
