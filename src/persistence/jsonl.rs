//! JSONL gateway - appends one JSON object per persisted bucket

use super::error::PersistError;
use super::gateway::PersistenceGateway;
use crate::aggregation::AggregateBucket;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Append-only JSON-lines storage
///
/// The whole batch is serialized before anything touches the file, then appended and synced.
/// A serialization failure leaves the file untouched; a failed write or sync truncates the
/// file back to its length before the batch, so a batch is either fully present or absent.
pub struct JsonlGateway {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlGateway {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        log::info!("📝 Writing aggregates to: {}", path.display());

        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceGateway for JsonlGateway {
    async fn run_in_transaction(&self, batch: &[AggregateBucket]) -> Result<(), PersistError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::with_capacity(batch.len() * 256);
        for bucket in batch {
            serde_json::to_writer(&mut buffer, bucket)?;
            buffer.push(b'\n');
        }

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        append_atomically(&mut *file, &buffer)?;

        log::debug!("✅ Appended {} aggregates to {}", batch.len(), self.path.display());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

/// Byte sink that can report and restore its length
trait AppendSink: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendSink for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        // Append mode keeps writing at the (new) end after set_len.
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

fn append_atomically<S: AppendSink>(sink: &mut S, buffer: &[u8]) -> io::Result<()> {
    let prev_len = sink.current_len()?;

    let result = sink.write_all(buffer).and_then(|_| sink.sync());
    if let Err(e) = result {
        if let Err(truncate_err) = sink.truncate(prev_len) {
            log::error!("❌ Failed to truncate partial JSONL batch back to {} bytes: {}", prev_len, truncate_err);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregateMerger, BucketKey, MeasurementEvent, TimerStatsMerger};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_jsonl_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aggregates.jsonl");
        let gateway = JsonlGateway::new(&path).unwrap();

        let merger = TimerStatsMerger;
        let batch: Vec<AggregateBucket> = (1..=3)
            .map(|i| {
                let key = BucketKey { entity_id: i, method_id: 1, bucket_start_ms: 0 };
                merger.create(i, key, &MeasurementEvent::new(i, 1, 10, i as f64))
            })
            .collect();

        gateway.run_in_transaction(&batch[..2]).await.unwrap();
        gateway.run_in_transaction(&batch[2..]).await.unwrap();
        gateway.run_in_transaction(&[]).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let parsed: AggregateBucket = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed, batch[2]);
        assert_eq!(gateway.backend_type(), "JSONL");
    }

    /// In-memory sink that accepts `capacity` bytes then fails every write
    struct ShortSink {
        data: Vec<u8>,
        capacity: usize,
        fail_sync: bool,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity.saturating_sub(self.data.len());
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendSink for ShortSink {
        fn current_len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_is_truncated() {
        let mut sink = ShortSink { data: b"existing\n".to_vec(), capacity: 16, fail_sync: false };

        let err = append_atomically(&mut sink, b"{\"serial\":1}\n{\"serial\":2}\n").unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(sink.data, b"existing\n");

        // Next batch that fits is appended after the surviving content
        append_atomically(&mut sink, b"{}\n").unwrap();
        assert_eq!(sink.data, b"existing\n{}\n");
    }

    #[test]
    fn test_failed_sync_is_truncated() {
        let mut sink = ShortSink { data: Vec::new(), capacity: 1_024, fail_sync: true };

        assert!(append_atomically(&mut sink, b"{\"serial\":1}\n").is_err());
        assert!(sink.data.is_empty());
    }

    #[test]
    fn test_file_truncate_keeps_appending_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aggregates.jsonl");
        let mut file = OpenOptions::new().create(true).append(true).open(&path).unwrap();

        append_atomically(&mut file, b"first\n").unwrap();
        file.write_all(b"partial").unwrap();
        file.truncate(6).unwrap();
        append_atomically(&mut file, b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
