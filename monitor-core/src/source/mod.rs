//! Event sources
//!
//! An [`EventSource`] yields raw records and may block while doing so. The
//! worker thread owns the source, so closing it from the control side goes
//! through a [`SourceCloser`] taken before the worker starts. Closing the
//! underlying resource is the only way to unblock a read that never returns.

use crate::config::DataSource;
use crate::error::SetupError;
use crate::types::Record;
use std::sync::Arc;

pub mod et;
pub mod file;
pub mod memory;

pub use et::EtRecordSource;
pub use file::FileRecordSource;
pub use memory::{MemorySource, RecordFeeder};

/// Outcome of a single read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRead {
    Record(Record),
    /// Nothing arrived within the wait period; the caller should try again
    Idle,
    /// The source is exhausted
    End,
}

/// Errors raised while reading from a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to close source: {0}")]
    CloseFailed(String),
}

/// A lazy sequence of raw records
pub trait EventSource: Send {
    /// Read the next record, blocking according to the source's wait policy
    fn next_record(&mut self) -> Result<SourceRead, SourceError>;

    /// Handle that closes the underlying resource from another thread
    fn closer(&self) -> SourceCloser {
        SourceCloser::noop()
    }
}

type CloseFn = dyn Fn() -> std::io::Result<()> + Send + Sync;

/// Closes a source's underlying resource from outside the worker thread
#[derive(Clone)]
pub struct SourceCloser(Option<Arc<CloseFn>>);

impl SourceCloser {
    pub fn new<F>(close: F) -> Self
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(close)))
    }

    /// A closer for sources that release everything on drop
    pub fn noop() -> Self {
        Self(None)
    }

    /// Close the resource. Calling this more than once is harmless.
    pub fn close(&self) -> Result<(), SourceError> {
        match &self.0 {
            Some(close) => close().map_err(|e| SourceError::CloseFailed(e.to_string())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SourceCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SourceCloser")
            .field(&if self.0.is_some() { "resource" } else { "noop" })
            .finish()
    }
}

/// Performs the blocking, source-specific setup of a session
pub trait SourceOpener: Send + Sync {
    fn open(&self, source: &DataSource) -> Result<Box<dyn EventSource>, SetupError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&DataSource) -> Result<Box<dyn EventSource>, SetupError> + Send + Sync,
{
    fn open(&self, source: &DataSource) -> Result<Box<dyn EventSource>, SetupError> {
        self(source)
    }
}

/// Opens the built-in transport and file readers
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, source: &DataSource) -> Result<Box<dyn EventSource>, SetupError> {
        match source {
            DataSource::EtServer(params) => Ok(Box::new(EtRecordSource::connect(params)?)),
            DataSource::EvioFile { path } | DataSource::LcioFile { path } => {
                Ok(Box::new(FileRecordSource::open(path)?))
            }
        }
    }
}

/// Strip a trailing `\n` or `\r\n` from a line-framed record
pub(crate) fn trim_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_noop_closer() {
        assert!(SourceCloser::noop().close().is_ok());
    }

    #[test]
    fn test_closer_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let closer = SourceCloser::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        closer.clone().close().unwrap();
        closer.close().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trim_line_ending() {
        let mut line = b"PHYSICS 12 abc\r\n".to_vec();
        trim_line_ending(&mut line);
        assert_eq!(line, b"PHYSICS 12 abc");

        let mut bare = b"no newline".to_vec();
        trim_line_ending(&mut bare);
        assert_eq!(bare, b"no newline");
    }
}
