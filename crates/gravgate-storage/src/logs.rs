use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::warn;

use crate::entities::LogRecord;
use crate::store::JsonFile;

/// On-disk cap; both the file and the in-memory ring keep at most this many.
const LOG_CAP: usize = 200;
/// Flush when this many entries accumulate since the last flush.
const FLUSH_THRESHOLD: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(42);

struct LogBufferInner {
    ring: VecDeque<LogRecord>,
    pending: usize,
}

/// Write-behind application log. Appends land in a bounded ring; a flush
/// merges the ring over the on-disk tail every 42 s, or immediately once 50
/// entries are pending.
pub struct LogBuffer {
    file: JsonFile<Vec<LogRecord>>,
    inner: Mutex<LogBufferInner>,
}

impl LogBuffer {
    pub fn new(file: JsonFile<Vec<LogRecord>>) -> Arc<Self> {
        Arc::new(Self {
            file,
            inner: Mutex::new(LogBufferInner {
                ring: VecDeque::new(),
                pending: 0,
            }),
        })
    }

    pub async fn append(&self, level: &str, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            level: level.to_string(),
            message: message.into(),
        };

        let flush_now = {
            let mut inner = self.inner.lock().await;
            inner.ring.push_back(record);
            while inner.ring.len() > LOG_CAP {
                inner.ring.pop_front();
            }
            inner.pending += 1;
            inner.pending >= FLUSH_THRESHOLD
        };

        if flush_now {
            self.flush().await;
        }
    }

    /// Merge the on-disk tail with the in-memory ring, newest last.
    pub async fn read_merged(&self) -> Vec<LogRecord> {
        let disk = self.file.load().await.unwrap_or_default();
        let inner = self.inner.lock().await;
        let mut merged: Vec<LogRecord> = disk
            .into_iter()
            .filter(|record| !inner.ring.contains(record))
            .collect();
        merged.extend(inner.ring.iter().cloned());
        if merged.len() > LOG_CAP {
            let excess = merged.len() - LOG_CAP;
            merged.drain(..excess);
        }
        merged
    }

    pub async fn flush(&self) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if inner.pending == 0 {
                return;
            }
            inner.pending = 0;
            inner.ring.iter().cloned().collect::<Vec<_>>()
        };

        let mut on_disk = self.file.load().await.unwrap_or_default();
        on_disk.retain(|record| !snapshot.contains(record));
        on_disk.extend(snapshot);
        if on_disk.len() > LOG_CAP {
            let excess = on_disk.len() - LOG_CAP;
            on_disk.drain(..excess);
        }
        if let Err(err) = self.file.write(&on_disk).await {
            warn!(event = "logs.flush", error = %err);
        }
    }

    /// Periodic flush loop; abort the returned handle on shutdown.
    pub fn spawn_flush_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                buffer.flush().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_is_bounded_and_flush_persists() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new(JsonFile::new(dir.path().join("app_logs.json")));
        for index in 0..230 {
            buffer.append("info", format!("entry {index}")).await;
        }
        buffer.flush().await;

        let merged = buffer.read_merged().await;
        assert_eq!(merged.len(), 200);
        assert_eq!(merged.last().unwrap().message, "entry 229");
        assert_eq!(merged.first().unwrap().message, "entry 30");
    }

    #[tokio::test]
    async fn unflushed_entries_are_visible_in_reads() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new(JsonFile::new(dir.path().join("app_logs.json")));
        buffer.append("warn", "not yet flushed").await;
        let merged = buffer.read_merged().await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].level, "warn");
    }
}
