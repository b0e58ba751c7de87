//! Local queue for blocks that failed to persist
//!
//! A block write that fails is never dropped. It goes into a pending queue
//! that is itself kept on disk, and is replayed later in order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::file::atomic_write;
use super::Persistence;
use crate::data::{Block, Snapshot};
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingBlock {
    session_id: String,
    block: Block,
    queued_at: DateTime<Utc>,
}

/// Anything with a pending queue the driver should drain periodically
pub trait RetryPending: Send + Sync {
    /// Replay queued writes in order, stopping at the first failure.
    /// Returns how many are still pending.
    fn retry_pending(&self) -> usize;

    fn pending_len(&self) -> usize;
}

/// Wraps a store so failed block writes are queued instead of lost
pub struct QueuedPersistence<P> {
    inner: P,
    queue_path: PathBuf,
    pending: Mutex<Vec<PendingBlock>>,
}

impl<P: Persistence> QueuedPersistence<P> {
    /// Wrap `inner`, picking up anything left in `queue_path` by a previous run
    pub fn new(inner: P, queue_path: impl Into<PathBuf>) -> Self {
        let queue_path = queue_path.into();
        let pending = match std::fs::read(&queue_path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<PendingBlock>>(&bytes) {
                Ok(pending) => {
                    if !pending.is_empty() {
                        info!("Loaded {} pending blocks from {:?}", pending.len(), queue_path);
                    }
                    pending
                }
                Err(e) => {
                    warn!("Ignoring unreadable pending queue {:?}: {}", queue_path, e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            inner,
            queue_path,
            pending: Mutex::new(pending),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn persist_queue(&self, pending: &[PendingBlock]) {
        let result = if pending.is_empty() {
            match std::fs::remove_file(&self.queue_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        } else {
            serde_json::to_vec(pending)
                .map_err(std::io::Error::other)
                .and_then(|bytes| atomic_write(&self.queue_path, &bytes))
        };

        if let Err(e) = result {
            warn!(
                "Failed to write pending queue {:?} ({} blocks kept in memory): {}",
                self.queue_path,
                pending.len(),
                e
            );
        }
    }
}

impl<P: Persistence> Persistence for QueuedPersistence<P> {
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.inner.save_snapshot(snapshot)
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        self.inner.load_snapshot()
    }

    fn clear_snapshot(&self) -> Result<(), StoreError> {
        self.inner.clear_snapshot()
    }

    fn record_completed_block(&self, session_id: &str, block: &Block) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();

        // Keep ordering: nothing overtakes blocks already waiting.
        if pending.is_empty() {
            match self.inner.record_completed_block(session_id, block) {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    "Failed to record block {} of session {}, queueing locally: {}",
                    block.block_number, session_id, e
                ),
            }
        }

        pending.push(PendingBlock {
            session_id: session_id.to_string(),
            block: block.clone(),
            queued_at: Utc::now(),
        });
        self.persist_queue(&pending);
        Ok(())
    }
}

impl<P: Persistence> RetryPending for QueuedPersistence<P> {
    fn retry_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return 0;
        }

        let mut flushed = 0;
        for item in pending.iter() {
            match self.inner.record_completed_block(&item.session_id, &item.block) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    debug!("Pending block retry failed: {}", e);
                    break;
                }
            }
        }

        if flushed > 0 {
            pending.drain(..flushed);
            self.persist_queue(&pending);
            info!("Flushed {} pending blocks, {} remaining", flushed, pending.len());
        }
        pending.len()
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Exponential backoff with deterministic jitter in [0.8, 1.2)
pub fn retry_delay(attempt: u32, base: Duration, max: Duration, key: &str) -> Duration {
    let exp = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    let delay = base.checked_mul(exp).unwrap_or(max).min(max);
    delay.mul_f64(jitter_multiplier(key, attempt)).min(max)
}

fn jitter_multiplier(key: &str, attempt: u32) -> f64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let bucket = (hasher.finish() % 401) as f64;
    0.8 + (bucket / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ActivityCounts;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn block(number: u32) -> Block {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Block {
            block_number: number,
            started_at: start,
            ended_at: start + chrono::Duration::minutes(10),
            duration_seconds: 600,
            activity_percent: 10,
            activity: ActivityCounts::default(),
            screenshot: None,
            screenshot_meta: None,
            is_partial: false,
            is_missed: false,
        }
    }

    #[test]
    fn test_failed_writes_queue_then_flush_in_order() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MemoryStore::new());
        let store = QueuedPersistence::new(backend.clone(), dir.path().join("pending.json"));

        backend.set_fail_writes(true);
        store.record_completed_block("s", &block(1)).unwrap();
        store.record_completed_block("s", &block(2)).unwrap();
        assert_eq!(store.pending_len(), 2);
        assert_eq!(store.retry_pending(), 2);

        backend.set_fail_writes(false);
        // A new block must wait behind the queue.
        store.record_completed_block("s", &block(3)).unwrap();
        assert!(backend.recorded_blocks().is_empty());

        assert_eq!(store.retry_pending(), 0);
        let numbers: Vec<_> = backend
            .recorded_blocks()
            .into_iter()
            .map(|(_, b)| b.block_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(!dir.path().join("pending.json").exists());
    }

    #[test]
    fn test_queue_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let backend = Arc::new(MemoryStore::new());
        backend.set_fail_writes(true);

        {
            let store = QueuedPersistence::new(backend.clone(), &path);
            store.record_completed_block("s", &block(7)).unwrap();
        }

        backend.set_fail_writes(false);
        let reopened = QueuedPersistence::new(backend.clone(), &path);
        assert_eq!(reopened.pending_len(), 1);
        assert_eq!(reopened.retry_pending(), 0);
        assert_eq!(backend.recorded_blocks()[0].1.block_number, 7);
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let base = Duration::from_secs(30);
        let max = Duration::from_secs(2 * 60 * 60);

        let first = retry_delay(1, base, max, "k");
        assert!(first >= Duration::from_secs(24) && first < Duration::from_secs(36));

        let third = retry_delay(3, base, max, "k");
        assert!(third >= Duration::from_secs(96) && third < Duration::from_secs(144));

        assert!(retry_delay(40, base, max, "k") <= max);
    }
}
