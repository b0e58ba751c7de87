//! In-memory persistence for tests and embedding

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Persistence;
use crate::data::{Block, Snapshot};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<Snapshot>,
    /// Stored snapshot is unreadable
    corrupt: bool,
    blocks: Vec<(String, Block)>,
    snapshot_writes: usize,
}

/// Volatile store with switchable write failures
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Pretend the stored snapshot got damaged
    pub fn corrupt_snapshot(&self) {
        let mut inner = self.inner.lock();
        inner.snapshot = None;
        inner.corrupt = true;
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.lock().snapshot.clone()
    }

    pub fn put_snapshot(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock();
        inner.snapshot = Some(snapshot);
        inner.corrupt = false;
    }

    pub fn recorded_blocks(&self) -> Vec<(String, Block)> {
        self.inner.lock().blocks.clone()
    }

    pub fn snapshot_writes(&self) -> usize {
        self.inner.lock().snapshot_writes
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store writes disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl Persistence for MemoryStore {
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        inner.snapshot = Some(snapshot.clone());
        inner.corrupt = false;
        inner.snapshot_writes += 1;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.lock();
        if inner.corrupt {
            return Err(StoreError::Corrupt("unparseable snapshot".into()));
        }
        Ok(inner.snapshot.clone())
    }

    fn clear_snapshot(&self) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.lock();
        inner.snapshot = None;
        inner.corrupt = false;
        Ok(())
    }

    fn record_completed_block(&self, session_id: &str, block: &Block) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner
            .lock()
            .blocks
            .push((session_id.to_string(), block.clone()));
        Ok(())
    }
}
