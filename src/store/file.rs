//! Filesystem persistence
//!
//! Layout under the data directory:
//! - `snapshot.json`: live snapshot, replaced atomically
//! - `sessions/<session_id>/blocks.jsonl`: one redacted block per line
//! - `sessions/<session_id>/<block_number>.jpg`: screenshot pixels

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Persistence;
use crate::data::{Block, Snapshot};
use crate::error::StoreError;

const SNAPSHOT_FILE: &str = "snapshot.json";
const SESSIONS_DIR: &str = "sessions";
const BLOCKS_FILE: &str = "blocks.jsonl";

/// Store rooted at a data directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(SESSIONS_DIR).join(sanitize(session_id))
    }

    pub fn blocks_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(BLOCKS_FILE)
    }

    pub fn screenshot_path(&self, session_id: &str, block_number: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.jpg", block_number))
    }

    /// Read back a session's block ledger
    pub fn load_blocks(&self, session_id: &str) -> Result<Vec<Block>, StoreError> {
        let path = self.blocks_path(session_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

impl Persistence for FileStore {
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.snapshot_path(), &contents)?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let path = self.snapshot_path();
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{:?}: {}", path, e)))
    }

    fn clear_snapshot(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.snapshot_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn record_completed_block(&self, session_id: &str, block: &Block) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;

        if let Some(shot) = &block.screenshot {
            let path = self.screenshot_path(session_id, block.block_number);
            atomic_write(&path, &shot.data)?;
            debug!("Wrote screenshot for block {} to {:?}", block.block_number, path);
        }

        let mut line = serde_json::to_vec(&block.redacted())?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(BLOCKS_FILE))?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }
}

/// Keep session ids from escaping the sessions directory
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write via temp file, fsync, rename, so readers see the old or the new
/// contents and never a torn file.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let temp_path = path.with_file_name(format!(
        ".{}.tmp.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
