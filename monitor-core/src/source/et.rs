//! Live event transport reader
//!
//! Attaches to a transport server over TCP and reads one record per line.
//! The wait mode decides how a read behaves when no record is available:
//! sleep blocks until data or shutdown, timed gives up after `wait_time_ms`,
//! async polls without blocking.

use super::{trim_line_ending, EventSource, SourceCloser, SourceError, SourceRead};
use crate::config::{EtConnectionParams, WaitMode};
use crate::error::SetupError;
use crate::types::Record;
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Back-off between polls in async wait mode
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes reserved per record when sizing the read buffer
const RECORD_SIZE_HINT: usize = 16 * 1024;

pub struct EtRecordSource {
    reader: BufReader<TcpStream>,
    stream: Arc<TcpStream>,
    closed: Arc<AtomicBool>,
    wait_mode: WaitMode,
    prescale: u64,
    pending: Vec<u8>,
    received: u64,
    next_id: u64,
}

impl EtRecordSource {
    /// Attach to the transport server described by `params`
    pub fn connect(params: &EtConnectionParams) -> Result<Self, SetupError> {
        let unavailable = |e: std::io::Error| SetupError::SourceUnavailable {
            reason: format!("{}:{}: {}", params.host, params.port, e),
        };

        let stream = TcpStream::connect((params.host.as_str(), params.port)).map_err(unavailable)?;

        match params.wait_mode {
            WaitMode::Sleep => stream.set_read_timeout(None).map_err(unavailable)?,
            WaitMode::Timed => stream
                .set_read_timeout(params.read_timeout())
                .map_err(unavailable)?,
            WaitMode::Async => stream.set_nonblocking(true).map_err(unavailable)?,
        }

        let control = stream.try_clone().map_err(unavailable)?;
        let capacity = RECORD_SIZE_HINT * params.chunk_size.max(1) as usize;

        info!(
            host = %params.host,
            port = params.port,
            buffer = %params.buffer_name,
            station = %params.station_name,
            position = params.station_position,
            wait_mode = ?params.wait_mode,
            queue_size = params.queue_size,
            prescale = params.prescale,
            "Attached to event transport"
        );

        Ok(Self {
            reader: BufReader::with_capacity(capacity, stream),
            stream: Arc::new(control),
            closed: Arc::new(AtomicBool::new(false)),
            wait_mode: params.wait_mode,
            prescale: u64::from(params.prescale.max(1)),
            pending: Vec::new(),
            received: 0,
            next_id: 1,
        })
    }
}

impl EventSource for EtRecordSource {
    fn next_record(&mut self) -> Result<SourceRead, SourceError> {
        loop {
            // Partial lines stay in `pending` across timed-out reads
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) if self.pending.is_empty() => {
                    debug!(records = self.next_id - 1, "Transport closed the stream");
                    return Ok(SourceRead::End);
                }
                Ok(n) if n > 0 && self.pending.last() != Some(&b'\n') => {
                    // Stream ended mid-line; the next read returns 0 and flushes it
                    continue;
                }
                Ok(_) => {
                    let mut line = std::mem::take(&mut self.pending);
                    trim_line_ending(&mut line);
                    self.received += 1;
                    if (self.received - 1) % self.prescale != 0 {
                        continue;
                    }
                    let record = Record::new(self.next_id, line);
                    self.next_id += 1;
                    return Ok(SourceRead::Record(record));
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self.wait_mode == WaitMode::Async {
                        std::thread::sleep(ASYNC_POLL_INTERVAL);
                    }
                    return Ok(SourceRead::Idle);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) if self.closed.load(Ordering::SeqCst) => return Ok(SourceRead::End),
                Err(e) => return Err(SourceError::Io(e)),
            }
        }
    }

    fn closer(&self) -> SourceCloser {
        let stream = Arc::clone(&self.stream);
        let closed = Arc::clone(&self.closed);
        SourceCloser::new(move || {
            if closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            }
        })
    }
}
