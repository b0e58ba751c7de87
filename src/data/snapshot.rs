//! Live snapshot of a running session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Block;

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
        }
    }
}

/// Minimal state needed to resume a session after the process disappears.
///
/// Completed blocks are stored without screenshot pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub state: EngineState,
    pub session_id: String,
    pub project_ref: String,
    #[serde(default)]
    pub memo: String,
    pub session_started_at: DateTime<Utc>,
    pub block_number: u32,
    pub block_started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_blocks: Vec<Block>,
    pub saved_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }
}
