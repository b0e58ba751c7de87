//! Engine events and the bus that fans them out

use tokio::sync::broadcast;
use tracing::trace;

use crate::data::{Block, EngineState};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Display-only progress, about once per second while running
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    pub total_elapsed_secs: u64,
    pub block_elapsed_secs: u64,
    /// 0.0..=1.0
    pub block_progress: f64,
    pub block_number: u32,
    pub completed_blocks: usize,
    /// Activity percent of the current block so far
    pub live_activity_percent: u8,
}

/// Everything the engine tells the outside world
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(TickInfo),
    /// Fires exactly once per finalized block: full, partial or missed
    BlockCompleted { session_id: String, block: Block },
    /// The current block's screenshot instant arrived
    ScreenshotNeeded { session_id: String, block_number: u32 },
    StateChanged(EngineState),
}

impl EngineEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            EngineEvent::Tick(_) => "tick",
            EngineEvent::BlockCompleted { .. } => "block_completed",
            EngineEvent::ScreenshotNeeded { .. } => "screenshot_needed",
            EngineEvent::StateChanged(_) => "state_changed",
        }
    }
}

/// Multi-subscriber event fan-out
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Nobody listening is normal (headless runs, tests that don't care).
        if let Err(e) = self.sender.send(event) {
            trace!("Dropped {} event, no subscribers", e.0.event_name());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
