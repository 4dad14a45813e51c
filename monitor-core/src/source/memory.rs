//! In-process record source fed through a channel
//!
//! Used to replay captured records and to drive sessions from code. A source
//! built with [`MemorySource::channel`] blocks like a live transport until the
//! feeder pushes a record, finishes, or the source is closed. Dropping every
//! feeder also ends the stream.

use super::{EventSource, SourceCloser, SourceError, SourceRead};
use crate::types::Record;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked read rechecks whether the source was closed
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(20);

enum Message {
    Record(Vec<u8>),
    End,
}

/// Pushes records into a [`MemorySource`]
#[derive(Clone)]
pub struct RecordFeeder {
    tx: Sender<Message>,
}

impl RecordFeeder {
    /// Queue a record; returns false once the source has gone away
    pub fn push(&self, data: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Message::Record(data.into())).is_ok()
    }

    /// Mark the end of the stream
    pub fn finish(&self) {
        let _ = self.tx.send(Message::End);
    }
}

/// A record source backed by an in-memory channel
pub struct MemorySource {
    rx: Receiver<Message>,
    closed: Arc<AtomicBool>,
    next_id: u64,
    ended: bool,
}

impl MemorySource {
    /// A source that yields `records` and then reports end-of-stream
    pub fn from_records<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        let (feeder, source) = Self::channel();
        for record in records {
            feeder.push(record);
        }
        feeder.finish();
        source
    }

    /// A source that blocks until records are pushed through the feeder
    pub fn channel() -> (RecordFeeder, Self) {
        let (tx, rx) = mpsc::channel();
        let source = Self {
            rx,
            closed: Arc::new(AtomicBool::new(false)),
            next_id: 1,
            ended: false,
        };
        (RecordFeeder { tx }, source)
    }
}

impl EventSource for MemorySource {
    fn next_record(&mut self) -> Result<SourceRead, SourceError> {
        if self.ended {
            return Ok(SourceRead::End);
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                self.ended = true;
                return Ok(SourceRead::End);
            }
            match self.rx.recv_timeout(CLOSE_POLL_INTERVAL) {
                Ok(Message::Record(data)) => {
                    let record = Record::new(self.next_id, data);
                    self.next_id += 1;
                    return Ok(SourceRead::Record(record));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(Message::End) | Err(RecvTimeoutError::Disconnected) => {
                    self.ended = true;
                    return Ok(SourceRead::End);
                }
            }
        }
    }

    fn closer(&self) -> SourceCloser {
        let closed = Arc::clone(&self.closed);
        SourceCloser::new(move || {
            closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn read(source: &mut MemorySource) -> SourceRead {
        source.next_record().unwrap()
    }

    #[test]
    fn test_from_records_then_end() {
        let mut source = MemorySource::from_records(["e1", "e2"]);
        assert_eq!(read(&mut source), SourceRead::Record(Record::new(1, "e1")));
        assert_eq!(read(&mut source), SourceRead::Record(Record::new(2, "e2")));
        assert_eq!(read(&mut source), SourceRead::End);
        assert_eq!(read(&mut source), SourceRead::End);
    }

    #[test]
    fn test_closer_unblocks_pending_read() {
        let (_feeder, mut source) = MemorySource::channel();
        let closer = source.closer();

        let reader = thread::spawn(move || source.next_record().unwrap());
        thread::sleep(Duration::from_millis(20));
        closer.close().unwrap();

        assert_eq!(reader.join().unwrap(), SourceRead::End);
    }

    #[test]
    fn test_dropped_feeders_end_the_stream() {
        let (feeder, mut source) = MemorySource::channel();
        feeder.push("e1");
        drop(feeder);

        let reader = thread::spawn(move || {
            let first = source.next_record().unwrap();
            let second = source.next_record().unwrap();
            (first, second)
        });

        let (first, second) = reader.join().unwrap();
        assert_eq!(first, SourceRead::Record(Record::new(1, "e1")));
        assert_eq!(second, SourceRead::End);
    }
}
