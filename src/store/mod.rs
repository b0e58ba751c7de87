//! Persistence for snapshots and completed blocks
//!
//! From the engine's point of view every call here is best-effort: a failed
//! write is logged and the timer keeps running.

mod file;
mod memory;
mod outbox;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use outbox::{retry_delay, QueuedPersistence, RetryPending};

use crate::data::{Block, Snapshot};
use crate::error::StoreError;

/// Durable storage the engine writes through
pub trait Persistence: Send + Sync {
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// `Err(StoreError::Corrupt)` when a snapshot exists but cannot be parsed
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;

    fn clear_snapshot(&self) -> Result<(), StoreError>;

    fn record_completed_block(&self, session_id: &str, block: &Block) -> Result<(), StoreError>;
}

impl<P: Persistence + ?Sized> Persistence for std::sync::Arc<P> {
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        (**self).save_snapshot(snapshot)
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        (**self).load_snapshot()
    }

    fn clear_snapshot(&self) -> Result<(), StoreError> {
        (**self).clear_snapshot()
    }

    fn record_completed_block(&self, session_id: &str, block: &Block) -> Result<(), StoreError> {
        (**self).record_completed_block(session_id, block)
    }
}
