//! Resuming a session after the process died
//!
//! The snapshot records where the current block started. On restart every
//! whole block that fit between then and now is recorded as missed (no
//! activity, no screenshot), and the engine resumes inside the block that
//! contains "now".

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::engine::{whole_blocks, Session, TimerEngine};
use super::events::EngineEvent;
use crate::data::{ActivityCounts, Block, EngineState, Snapshot};

/// What `restore()` recovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub session_id: String,
    /// Blocks synthesized for the downtime
    pub missed_blocks: u32,
    /// Block the engine resumed in
    pub block_number: u32,
    pub block_started_at: DateTime<Utc>,
}

impl TimerEngine {
    /// Resume from the persisted snapshot, if there is a running one.
    ///
    /// A missing, unreadable or idle snapshot leaves the engine idle. Unreadable
    /// ones are cleared so the next launch starts clean.
    pub fn restore(&mut self) -> Option<RestoreReport> {
        if self.is_running() {
            debug!("restore() ignored, session already running");
            return None;
        }

        let snapshot = match self.store.load_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No snapshot to restore");
                return None;
            }
            Err(e) => {
                warn!("Discarding unreadable snapshot: {}", e);
                self.discard_snapshot();
                return None;
            }
        };

        if !snapshot.is_running() || snapshot.block_number == 0 {
            debug!(
                "Ignoring snapshot in state {} at block {}",
                snapshot.state, snapshot.block_number
            );
            self.discard_snapshot();
            return None;
        }

        Some(self.resume_from(snapshot))
    }

    fn resume_from(&mut self, snapshot: Snapshot) -> RestoreReport {
        let now = self.clock.now();
        let block_length = self.settings.block_length;

        let mut block_start = snapshot.block_started_at;
        if block_start > now {
            warn!(
                "Snapshot block start {} is ahead of the clock ({}), resuming from now",
                block_start, now
            );
            block_start = now;
        }

        let missed = whole_blocks(now - block_start, block_length);

        self.session = Some(Session {
            session_id: snapshot.session_id.clone(),
            project_ref: snapshot.project_ref,
            memo: snapshot.memo,
            started_at: snapshot.session_started_at,
            stopped_at: None,
        });
        self.block_number = snapshot.block_number;
        self.block_started_at = Some(block_start);
        self.completed = snapshot.completed_blocks;
        self.state = EngineState::Running;
        self.arm_periodic(now);

        if missed > 0 {
            info!(
                "Recording {} missed blocks for session {}",
                missed, snapshot.session_id
            );
            self.synthesize_missed(block_start, missed);
        }

        let resumed_at = block_start + block_length * missed as i32;
        self.block_started_at = Some(resumed_at);
        self.sampler.reset_block(now);
        self.arm_block_timers(now);
        self.save_snapshot();

        info!(
            "Restored session {} at block {} ({}s in)",
            snapshot.session_id,
            self.block_number,
            (now - resumed_at).num_seconds()
        );
        self.events
            .publish(EngineEvent::StateChanged(EngineState::Running));

        RestoreReport {
            session_id: snapshot.session_id,
            missed_blocks: missed,
            block_number: self.block_number,
            block_started_at: resumed_at,
        }
    }

    /// Record `count` empty blocks back to back from `from`, advancing the
    /// block number past them.
    pub(super) fn synthesize_missed(&mut self, from: DateTime<Utc>, count: u32) {
        let block_length = self.settings.block_length;
        for i in 0..count {
            let started_at = from + block_length * i as i32;
            let block = Block {
                block_number: self.block_number,
                started_at,
                ended_at: started_at + block_length,
                duration_seconds: block_length.num_seconds() as u64,
                activity_percent: 0,
                activity: ActivityCounts::default(),
                screenshot: None,
                screenshot_meta: None,
                is_partial: false,
                is_missed: true,
            };
            self.finish_block(block);
            self.block_number += 1;
        }
    }

    fn discard_snapshot(&self) {
        if let Err(e) = self.store.clear_snapshot() {
            warn!("Failed to clear snapshot: {}", e);
        }
    }
}
