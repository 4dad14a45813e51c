//! Processing statistics
//!
//! Counters are written only by the worker thread and read by anyone. They are
//! atomics, and the last error sits behind its own lock, so a slow status
//! observer can never stall the event loop.

use crate::error::ProcessingError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Live counters for one session
#[derive(Debug)]
pub struct SessionStatistics {
    events: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    started: Instant,
    /// Elapsed time frozen when the worker stops
    stopped_after: Mutex<Option<Duration>>,
    last_error: Mutex<Option<ProcessingError>>,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
            stopped_after: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn record_event(&self, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.events.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_error(&self, error: ProcessingError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self.errors.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn mark_stopped(&self) {
        let mut stopped = self
            .stopped_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if stopped.is_none() {
            *stopped = Some(self.started.elapsed());
        }
    }

    pub fn events_consumed(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<ProcessingError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.stopped_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Consistent-enough copy of the counters for display
    pub fn snapshot(&self) -> ProcessingStatistics {
        ProcessingStatistics {
            events_consumed: self.events_consumed(),
            bytes_consumed: self.bytes.load(Ordering::Relaxed),
            errors: self.error_count(),
            last_error: self.last_error(),
            elapsed_ms: self.elapsed().as_millis() as u64,
        }
    }
}

impl Default for SessionStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a session's statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingStatistics {
    pub events_consumed: u64,
    pub bytes_consumed: u64,
    pub errors: u64,
    pub last_error: Option<ProcessingError>,
    pub elapsed_ms: u64,
}

impl ProcessingStatistics {
    /// Average event rate over the session
    pub fn events_per_second(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.events_consumed as f64 * 1000.0 / self.elapsed_ms as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;

    #[test]
    fn test_counters() {
        let stats = SessionStatistics::new();
        stats.record_event(100);
        stats.record_event(24);
        stats.record_error(ProcessingError::Build(BuildError::new(3, "truncated bank")));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_consumed, 2);
        assert_eq!(snapshot.bytes_consumed, 124);
        assert_eq!(snapshot.errors, 1);
        assert!(matches!(snapshot.last_error, Some(ProcessingError::Build(_))));
    }

    #[test]
    fn test_elapsed_freezes_when_stopped() {
        let stats = SessionStatistics::new();
        stats.mark_stopped();
        let frozen = stats.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.elapsed(), frozen);
    }

    #[test]
    fn test_rate() {
        let snapshot = ProcessingStatistics {
            events_consumed: 500,
            bytes_consumed: 0,
            errors: 0,
            last_error: None,
            elapsed_ms: 250,
        };
        assert_eq!(snapshot.events_per_second(), 2000.0);
    }
}
