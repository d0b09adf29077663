//! Log writer for appending records.
//!
//! A [`LogWriter`] appends checksummed records either to an in-memory buffer
//! or to a single log file. Record LSNs are byte offsets into the log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use quarry_common::types::{DataChunk, RowId, Vector};

use crate::config::{LogConfig, SyncPolicy};
use crate::error::{WalError, WalResult};
use crate::record::{
    DeletePayload, InsertPayload, LogPayload, LogRecord, SetTablePayload, UpdatePayload,
};
use crate::WriteAheadLog;

/// Log writer statistics.
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Total bytes written.
    pub bytes_written: AtomicU64,
    /// Total records written.
    pub records_written: AtomicU64,
    /// Number of syncs performed.
    pub syncs: AtomicU64,
}

enum LogSink {
    Memory(BytesMut),
    File {
        writer: BufWriter<File>,
        path: PathBuf,
    },
}

struct WriterInner {
    sink: LogSink,
    next_lsn: u64,
}

/// Log writer for appending records.
pub struct LogWriter {
    config: LogConfig,
    inner: Mutex<WriterInner>,
    stats: WriterStats,
    closed: AtomicBool,
}

impl LogWriter {
    fn with_sink(config: LogConfig, sink: LogSink, next_lsn: u64) -> Self {
        Self {
            config,
            inner: Mutex::new(WriterInner { sink, next_lsn }),
            stats: WriterStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a writer that keeps the log in memory.
    pub fn in_memory(config: LogConfig) -> Self {
        Self::with_sink(config, LogSink::Memory(BytesMut::new()), 0)
    }

    /// Creates (or truncates) a log file.
    pub fn create(path: impl AsRef<Path>, config: LogConfig) -> WalResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "created log file");
        Ok(Self::with_sink(
            config,
            LogSink::File {
                writer: BufWriter::new(file),
                path,
            },
            0,
        ))
    }

    /// Opens an existing log file for appending.
    pub fn open(path: impl AsRef<Path>, config: LogConfig) -> WalResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let next_lsn = file.metadata()?.len();
        debug!(path = %path.display(), next_lsn, "opened log file");
        Ok(Self::with_sink(
            config,
            LogSink::File {
                writer: BufWriter::new(file),
                path,
            },
            next_lsn,
        ))
    }

    /// Returns the next LSN that will be assigned.
    pub fn next_lsn(&self) -> u64 {
        self.inner.lock().next_lsn
    }

    /// Returns the log file path, if the log is file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.inner.lock().sink {
            LogSink::File { path, .. } => Some(path.clone()),
            LogSink::Memory(_) => None,
        }
    }

    /// Returns the bytes of an in-memory log.
    pub fn contents(&self) -> Option<Bytes> {
        match &self.inner.lock().sink {
            LogSink::Memory(buf) => Some(Bytes::copy_from_slice(buf)),
            LogSink::File { .. } => None,
        }
    }

    /// Returns writer statistics.
    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Appends one record and returns its LSN.
    pub fn append(&self, payload: LogPayload) -> WalResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        let record = LogRecord::new(lsn, payload)?;
        let bytes = record.serialize()?;
        if bytes.len() > self.config.max_record_size {
            return Err(WalError::record_too_large(
                bytes.len(),
                self.config.max_record_size,
            ));
        }

        match &mut inner.sink {
            LogSink::Memory(buf) => buf.extend_from_slice(&bytes),
            LogSink::File { writer, .. } => {
                writer.write_all(&bytes)?;
                if self.config.sync_policy == SyncPolicy::EveryWrite {
                    writer.flush()?;
                    writer.get_ref().sync_data()?;
                    self.stats.syncs.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        inner.next_lsn += bytes.len() as u64;

        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.stats.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Flushes buffered records and syncs according to the sync policy.
    pub fn sync(&self) -> WalResult<()> {
        let mut inner = self.inner.lock();
        if let LogSink::File { writer, .. } = &mut inner.sink {
            writer.flush()?;
            if self.config.sync_policy != SyncPolicy::Never {
                writer.get_ref().sync_data()?;
                self.stats.syncs.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Flushes and closes the writer. Further appends fail.
    pub fn close(&self) -> WalResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sync()
    }
}

impl WriteAheadLog for LogWriter {
    fn write_set_table(&self, schema: &str, table: &str) -> WalResult<()> {
        self.append(LogPayload::SetTable(SetTablePayload {
            schema: schema.to_string(),
            table: table.to_string(),
        }))
        .map(|_| ())
    }

    fn write_insert(&self, chunk: &DataChunk) -> WalResult<()> {
        self.append(LogPayload::Insert(InsertPayload {
            chunk: chunk.clone(),
        }))
        .map(|_| ())
    }

    fn write_delete(&self, row_ids: &[RowId]) -> WalResult<()> {
        self.append(LogPayload::Delete(DeletePayload {
            row_ids: row_ids.to_vec(),
        }))
        .map(|_| ())
    }

    fn write_update(&self, column_path: &[usize], row_ids: &[RowId], values: &Vector) -> WalResult<()> {
        self.append(LogPayload::Update(UpdatePayload {
            column_path: column_path.to_vec(),
            row_ids: row_ids.to_vec(),
            values: values.clone(),
        }))
        .map(|_| ())
    }

    fn flush(&self) -> WalResult<()> {
        self.sync()
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let LogSink::File { writer, .. } = &mut self.inner.get_mut().sink {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::types::{LogicalType, Value};

    #[test]
    fn test_memory_writer_lsns() {
        let writer = LogWriter::in_memory(LogConfig::for_testing());
        let first = writer.write_set_table("main", "t").map(|_| writer.next_lsn());
        assert!(first.is_ok());

        let lsn = writer
            .append(LogPayload::Delete(DeletePayload {
                row_ids: vec![RowId::new(3)],
            }))
            .unwrap();
        assert_eq!(lsn, first.unwrap());
        assert_eq!(writer.stats().records_written.load(Ordering::Relaxed), 2);
        assert_eq!(writer.contents().unwrap().len() as u64, writer.next_lsn());
    }

    #[test]
    fn test_record_too_large() {
        let writer = LogWriter::in_memory(LogConfig::for_testing().with_max_record_size(64));
        let chunk = DataChunk::from_rows(
            &[LogicalType::Varchar],
            &[vec![Value::from("x".repeat(100))]],
        )
        .unwrap();
        let err = writer.write_insert(&chunk).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge { .. }));
        assert_eq!(writer.next_lsn(), 0);
    }

    #[test]
    fn test_closed_writer() {
        let writer = LogWriter::in_memory(LogConfig::for_testing());
        writer.close().unwrap();
        assert!(matches!(
            writer.write_delete(&[RowId::new(1)]),
            Err(WalError::Closed)
        ));
    }

    #[test]
    fn test_file_writer_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.log");

        let writer = LogWriter::create(&path, LogConfig::for_testing()).unwrap();
        writer.write_set_table("main", "t").unwrap();
        writer.flush().unwrap();
        let end = writer.next_lsn();
        drop(writer);

        let reopened = LogWriter::open(&path, LogConfig::for_testing()).unwrap();
        assert_eq!(reopened.next_lsn(), end);
        assert_eq!(reopened.path(), Some(path));
    }
}
