//! Ordered deployment log with batched persistence

use std::sync::Arc;

use chrono::Utc;
use platform_models::{LogEntry, LogStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::store::DeploymentStore;

/// Live tail subscribers lagging behind this many lines miss entries
const TAIL_CAPACITY: usize = 1024;

struct LogBuffer {
    next_order: u64,
    batch: u32,
    pending: Vec<LogEntry>,
}

/// Append-only log of a single deployment.
///
/// Orders are assigned under the buffer lock, so lines keep their order even
/// when several tasks write and flush concurrently. Lines are persisted in
/// batches; a failed flush keeps the batch for the next attempt.
pub struct DeploymentLog {
    deployment_uuid: String,
    store: Arc<dyn DeploymentStore>,
    buffer: Mutex<LogBuffer>,
    flush_threshold: usize,
    tail: broadcast::Sender<LogEntry>,
}

impl DeploymentLog {
    /// Open the log of a deployment, continuing after the last persisted line
    pub async fn open(
        deployment_uuid: &str,
        store: Arc<dyn DeploymentStore>,
        flush_threshold: usize,
    ) -> Result<Self, EngineError> {
        let last = store.last_log_order(deployment_uuid).await?;
        let (tail, _) = broadcast::channel(TAIL_CAPACITY);
        Ok(Self {
            deployment_uuid: deployment_uuid.to_string(),
            store,
            buffer: Mutex::new(LogBuffer {
                next_order: last + 1,
                batch: 1,
                pending: Vec::new(),
            }),
            flush_threshold: flush_threshold.max(1),
            tail,
        })
    }

    pub fn deployment_uuid(&self) -> &str {
        &self.deployment_uuid
    }

    /// Subscribe to lines as they are added
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tail.subscribe()
    }

    /// Append a line
    pub async fn add(&self, output: impl Into<String>, stream: LogStream, hidden: bool) {
        let output = output.into();
        if hidden {
            debug!(deployment = %self.deployment_uuid, "{}", output);
        }

        let mut buffer = self.buffer.lock().await;
        let entry = LogEntry {
            order: buffer.next_order,
            timestamp: Utc::now(),
            output,
            stream,
            hidden,
            batch: buffer.batch,
        };
        buffer.next_order += 1;
        buffer.pending.push(entry.clone());
        // No subscribers is fine
        let _ = self.tail.send(entry);

        if buffer.pending.len() >= self.flush_threshold {
            self.flush_locked(&mut buffer).await;
        }
    }

    pub async fn info(&self, output: impl Into<String>) {
        self.add(output, LogStream::Stdout, false).await;
    }

    pub async fn error(&self, output: impl Into<String>) {
        self.add(output, LogStream::Stderr, false).await;
    }

    /// Debug-only line, excluded from the public log
    pub async fn debug(&self, output: impl Into<String>) {
        self.add(output, LogStream::Stdout, true).await;
    }

    /// Persist pending lines
    pub async fn flush(&self) {
        let mut buffer = self.buffer.lock().await;
        self.flush_locked(&mut buffer).await;
    }

    async fn flush_locked(&self, buffer: &mut LogBuffer) {
        if buffer.pending.is_empty() {
            return;
        }
        match self
            .store
            .append_logs(&self.deployment_uuid, &buffer.pending)
            .await
        {
            Ok(()) => {
                buffer.pending.clear();
                buffer.batch += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to persist {} log lines of deployment {}: {}",
                    buffer.pending.len(),
                    self.deployment_uuid,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_orders_are_monotonic_across_flushes() {
        let store = Arc::new(MemoryStore::new());
        let log = DeploymentLog::open("dep-1", store.clone(), 2).await.unwrap();

        log.info("one").await;
        log.info("two").await;
        log.debug("three").await;
        log.flush().await;

        let entries = store.logs_after("dep-1", 0).await.unwrap();
        let orders: Vec<u64> = entries.iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(entries[0].batch, 1);
        assert_eq!(entries[2].batch, 2);
        assert!(entries[2].hidden);
    }

    #[tokio::test]
    async fn test_reopen_continues_numbering() {
        let store = Arc::new(MemoryStore::new());
        let log = DeploymentLog::open("dep-1", store.clone(), 10).await.unwrap();
        log.info("first run").await;
        log.flush().await;

        let log = DeploymentLog::open("dep-1", store.clone(), 10).await.unwrap();
        log.info("canary step").await;
        log.flush().await;

        let entries = store.logs_after("dep-1", 1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order, 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_lines_live() {
        let store = Arc::new(MemoryStore::new());
        let log = DeploymentLog::open("dep-1", store, 10).await.unwrap();
        let mut rx = log.subscribe();

        log.error("boom").await;

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.output, "boom");
        assert_eq!(entry.stream, LogStream::Stderr);
    }
}
