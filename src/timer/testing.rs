//! Shared fixture for engine tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::engine::TimerEngine;
use super::events::EngineEvent;
use crate::clock::{Clock, ManualClock};
use crate::config::TimerSettings;
use crate::data::Block;
use crate::store::MemoryStore;

pub(crate) struct Harness {
    pub t0: DateTime<Utc>,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub settings: TimerSettings,
    pub engine: TimerEngine,
    rx: broadcast::Receiver<EngineEvent>,
    /// Every event seen so far, with the clock reading when it was drained
    pub events: Vec<(DateTime<Utc>, EngineEvent)>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(tweak: impl FnOnce(&mut TimerSettings)) -> Self {
        let mut settings = TimerSettings::default();
        tweak(&mut settings);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Self::build(t0, ManualClock::new(t0), Arc::new(MemoryStore::new()), settings)
    }

    /// A fresh engine over the same store and clock, as after a process restart
    pub fn relaunch(&self) -> Self {
        Self::build(
            self.t0,
            self.clock.clone(),
            self.store.clone(),
            self.settings,
        )
    }

    fn build(
        t0: DateTime<Utc>,
        clock: ManualClock,
        store: Arc<MemoryStore>,
        settings: TimerSettings,
    ) -> Self {
        let engine = TimerEngine::new(settings, Arc::new(clock.clone()), store.clone())
            .with_rng(StdRng::seed_from_u64(42));
        let rx = engine.subscribe();
        Self {
            t0,
            clock,
            store,
            settings,
            engine,
            rx,
            events: Vec::new(),
        }
    }

    /// Move the clock forward, stopping at every deadline on the way
    pub fn advance(&mut self, by: Duration) {
        let target = self.clock.now() + by;
        while let Some(next) = self.engine.next_deadline() {
            if next > target {
                break;
            }
            self.clock.set(next);
            self.engine.poll();
            self.drain();
        }
        self.clock.set(target);
        self.engine.poll();
        self.drain();
    }

    pub fn drain(&mut self) {
        let now = self.clock.now();
        while let Ok(event) = self.rx.try_recv() {
            self.events.push((now, event));
        }
    }
}

pub(crate) fn block_events(events: &[(DateTime<Utc>, EngineEvent)]) -> Vec<Block> {
    events
        .iter()
        .filter_map(|(_, event)| match event {
            EngineEvent::BlockCompleted { block, .. } => Some(block.clone()),
            _ => None,
        })
        .collect()
}
