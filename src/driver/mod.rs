//! Async host for the timer engine
//!
//! One task owns the [`TimerEngine`](crate::timer::TimerEngine) and serializes
//! everything that touches it: commands from handles, input signals, capture
//! results and timer deadlines. Callers talk to it through a cloneable
//! [`EngineHandle`].

mod runner;

pub use runner::EngineDriver;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::activity::ActivityKind;
use crate::data::{Block, EngineState};
use crate::error::DriverError;
use crate::timer::{EngineEvent, EventBus, RestoreReport, Session};

/// Commands that can be sent to the engine task
#[derive(Debug)]
pub enum EngineCommand {
    Start {
        project_ref: String,
        memo: String,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<Option<Block>>,
    },
    Reset {
        reply: oneshot::Sender<bool>,
    },
    Restore {
        reply: oneshot::Sender<Option<RestoreReport>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    CompletedBlocks {
        reply: oneshot::Sender<Vec<Block>>,
    },
    /// Stop the task, leaving any running session's snapshot in place
    Shutdown,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub session: Option<Session>,
    pub elapsed_seconds: u64,
    pub block_number: u32,
    pub block_elapsed_seconds: u64,
    /// 0.0..=1.0
    pub block_progress: f64,
    pub completed_blocks: usize,
    /// Blocks waiting in the local retry queue
    pub pending_blocks: usize,
}

/// Cloneable front door to a running engine task
#[derive(Debug, Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    activity_tx: mpsc::UnboundedSender<ActivityKind>,
    events: EventBus,
}

impl EngineHandle {
    /// Begin a session. `false` if one was already running.
    pub async fn start(
        &self,
        project_ref: impl Into<String>,
        memo: impl Into<String>,
    ) -> Result<bool, DriverError> {
        let project_ref = project_ref.into();
        let memo = memo.into();
        self.request(|reply| EngineCommand::Start {
            project_ref,
            memo,
            reply,
        })
        .await
    }

    /// End the session. Returns the partial block, if one was recorded.
    pub async fn stop(&self) -> Result<Option<Block>, DriverError> {
        self.request(|reply| EngineCommand::Stop { reply }).await
    }

    pub async fn reset(&self) -> Result<bool, DriverError> {
        self.request(|reply| EngineCommand::Reset { reply }).await
    }

    pub async fn restore(&self) -> Result<Option<RestoreReport>, DriverError> {
        self.request(|reply| EngineCommand::Restore { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, DriverError> {
        self.request(|reply| EngineCommand::Status { reply }).await
    }

    pub async fn elapsed_seconds(&self) -> Result<u64, DriverError> {
        Ok(self.status().await?.elapsed_seconds)
    }

    pub async fn current_block_progress(&self) -> Result<f64, DriverError> {
        Ok(self.status().await?.block_progress)
    }

    pub async fn completed_blocks(&self) -> Result<Vec<Block>, DriverError> {
        self.request(|reply| EngineCommand::CompletedBlocks { reply })
            .await
    }

    /// Forward an input signal observed by the host
    pub fn record_activity(&self, kind: ActivityKind) {
        let _ = self.activity_tx.send(kind);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| DriverError::Closed)?;
        rx.await.map_err(|_| DriverError::Closed)
    }
}
