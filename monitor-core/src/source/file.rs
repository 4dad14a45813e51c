//! Sequential file reader
//!
//! Reads one record per line. File reads never block indefinitely, so the
//! file is released when the worker drops the source and no closer is needed.

use super::{trim_line_ending, EventSource, SourceError, SourceRead};
use crate::error::SetupError;
use crate::types::Record;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileRecordSource {
    path: PathBuf,
    reader: BufReader<File>,
    next_id: u64,
}

impl FileRecordSource {
    pub fn open(path: &Path) -> Result<Self, SetupError> {
        let file = File::open(path).map_err(|e| SetupError::SourceUnavailable {
            reason: format!("cannot open {}: {}", path.display(), e),
        })?;

        debug!(path = %path.display(), "Opened record file");

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            next_id: 1,
        })
    }
}

impl EventSource for FileRecordSource {
    fn next_record(&mut self) -> Result<SourceRead, SourceError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                debug!(path = %self.path.display(), records = self.next_id - 1, "Reached end of file");
                return Ok(SourceRead::End);
            }
            trim_line_ending(&mut line);
            if line.is_empty() {
                continue;
            }
            let record = Record::new(self.next_id, std::mem::take(&mut line));
            self.next_id += 1;
            return Ok(SourceRead::Record(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reads_lines_as_records() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "PRESTART 5772\n\nPHYSICS 5772 a\r\nEND 5772").unwrap();

        let mut source = FileRecordSource::open(file.path()).unwrap();
        let mut records = Vec::new();
        while let SourceRead::Record(record) = source.next_record().unwrap() {
            records.push(record);
        }

        assert_eq!(
            records,
            vec![
                Record::new(1, "PRESTART 5772"),
                Record::new(2, "PHYSICS 5772 a"),
                Record::new(3, "END 5772"),
            ]
        );
    }

    #[test]
    fn test_open_missing_file() {
        let result = FileRecordSource::open(Path::new("/nonexistent/run.evio"));
        assert!(matches!(result, Err(SetupError::SourceUnavailable { .. })));
    }
}
