//! Log reader for replay.
//!
//! Reads records sequentially from an in-memory buffer or a log file. A
//! record cut short at the end of the log (a torn write) ends the stream;
//! a record whose checksum does not match is reported as corruption.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use crate::config::LogConfig;
use crate::error::WalResult;
use crate::record::{LogRecord, RecordHeader};

/// Sequential log reader.
pub struct LogReader {
    data: Bytes,
    offset: usize,
    verify_checksums: bool,
    failed: bool,
}

impl LogReader {
    /// Creates a reader over log bytes.
    pub fn from_bytes(data: Bytes, config: &LogConfig) -> Self {
        Self {
            data,
            offset: 0,
            verify_checksums: config.verify_checksums,
            failed: false,
        }
    }

    /// Opens a log file and reads it into memory.
    pub fn open(path: impl AsRef<Path>, config: &LogConfig) -> WalResult<Self> {
        let data = fs::read(path.as_ref())?;
        Ok(Self::from_bytes(Bytes::from(data), config))
    }

    /// Returns the offset of the next record.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Reads the next record, or `None` at the end of the log.
    pub fn next_record(&mut self) -> WalResult<Option<LogRecord>> {
        let remaining = self.data.len() - self.offset;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < RecordHeader::SIZE {
            warn!(
                offset = self.offset,
                remaining, "ignoring torn record header at end of log"
            );
            self.offset = self.data.len();
            return Ok(None);
        }

        let header = RecordHeader::deserialize(&mut &self.data[self.offset..])?;
        if remaining < header.total_size() {
            warn!(
                offset = self.offset,
                needed = header.total_size(),
                remaining,
                "ignoring torn record payload at end of log"
            );
            self.offset = self.data.len();
            return Ok(None);
        }

        let payload_start = self.offset + RecordHeader::SIZE;
        let payload = &self.data[payload_start..payload_start + header.payload_length as usize];
        let record = LogRecord::decode(header, payload, self.verify_checksums)?;
        self.offset += header.total_size();
        Ok(Some(record))
    }

    /// Reads every remaining record.
    pub fn read_all(mut self) -> WalResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

impl Iterator for LogReader {
    type Item = WalResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
