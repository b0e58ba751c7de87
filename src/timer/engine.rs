//! Work-session timer engine
//!
//! Divides a session into fixed-length blocks. Within each block it samples
//! input activity and raises one screenshot request at a random instant. At
//! each boundary it finalizes the block, hands it to persistence and announces
//! it on the event bus.
//!
//! The engine never sleeps or spawns. Timers live in a [`Scheduler`]; the host
//! waits until [`TimerEngine::next_deadline`] and calls [`TimerEngine::poll`].
//! Everything runs on whichever single task owns the engine.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EngineEvent, EventBus, TickInfo};
use super::screenshot::{ArmedShot, ScreenshotScheduler};
use crate::activity::{ActivityKind, ActivitySampler};
use crate::clock::Clock;
use crate::config::TimerSettings;
use crate::data::{Block, EngineState, Screenshot, Snapshot, SNAPSHOT_VERSION};
use crate::scheduler::{Fired, Scheduler, TimerId};
use crate::store::Persistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TimerKind {
    Tick,
    Sample,
    SnapshotFlush,
    Screenshot,
    BlockBoundary,
}

/// One continuous tracking run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub project_ref: String,
    pub memo: String,
    pub started_at: DateTime<Utc>,
    /// Set by `stop()`; elapsed time freezes here
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Which block a capture belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub session_id: String,
    pub block_number: u32,
}

/// The timer state machine
pub struct TimerEngine {
    pub(super) settings: TimerSettings,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) store: Arc<dyn Persistence>,
    pub(super) events: EventBus,
    pub(super) rng: StdRng,
    pub(super) scheduler: Scheduler<TimerKind>,
    pub(super) sampler: ActivitySampler,
    pub(super) screenshots: ScreenshotScheduler,
    pub(super) state: EngineState,
    pub(super) session: Option<Session>,
    pub(super) block_number: u32,
    pub(super) block_started_at: Option<DateTime<Utc>>,
    pub(super) completed: Vec<Block>,
    pub(super) boundary_timer: Option<TimerId>,
    pub(super) screenshot_timer: Option<TimerId>,
    pub(super) armed_shot: Option<ArmedShot>,
    /// The capture signal already fired for the current block
    pub(super) screenshot_taken: bool,
    pub(super) pending_screenshot: Option<Screenshot>,
    pub(super) capture_request: Option<CaptureRequest>,
}

impl TimerEngine {
    pub fn new(
        settings: TimerSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            screenshots: ScreenshotScheduler::new(
                settings.screenshot_min_delay,
                settings.screenshot_max_delay,
            ),
            settings,
            clock,
            store,
            events: EventBus::new(),
            rng: StdRng::from_entropy(),
            scheduler: Scheduler::new(),
            sampler: ActivitySampler::new(),
            state: EngineState::Idle,
            session: None,
            block_number: 0,
            block_started_at: None,
            completed: Vec::new(),
            boundary_timer: None,
            screenshot_timer: None,
            armed_shot: None,
            screenshot_taken: false,
            pending_screenshot: None,
            capture_request: None,
        }
    }

    /// Use a specific RNG for screenshot timing
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Publish on an existing bus
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The engine's notion of "now"
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Blocks finalized so far; kept after `stop()` until `reset()`
    pub fn completed_blocks(&self) -> &[Block] {
        &self.completed
    }

    /// Current block number, 0 before the first start
    pub fn block_number(&self) -> u32 {
        self.block_number
    }

    pub fn current_block_started_at(&self) -> Option<DateTime<Utc>> {
        self.block_started_at
    }

    /// Screenshot instant drawn for the current block
    pub fn armed_screenshot(&self) -> Option<ArmedShot> {
        self.armed_shot
    }

    /// Begin a session. No-op while already running.
    pub fn start(&mut self, project_ref: impl Into<String>, memo: impl Into<String>) -> bool {
        if self.is_running() {
            debug!("start() ignored, session already running");
            return false;
        }

        let now = self.clock.now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            project_ref: project_ref.into(),
            memo: memo.into(),
            started_at: now,
            stopped_at: None,
        };
        info!(
            "Starting session {} for project {}",
            session.session_id, session.project_ref
        );

        self.session = Some(session);
        self.block_number = 1;
        self.block_started_at = Some(now);
        self.completed.clear();
        self.state = EngineState::Running;

        self.arm_periodic(now);
        self.sampler.reset_block(now);
        self.arm_block_timers(now);
        self.save_snapshot();

        self.events
            .publish(EngineEvent::StateChanged(EngineState::Running));
        true
    }

    /// End the session.
    ///
    /// A boundary that is already overdue (the host slept and nobody polled
    /// yet) is finalized first, together with any missed blocks, exactly as
    /// `poll()` would have done. The unfinished block is then kept as a
    /// partial block when it reached the threshold and dropped otherwise.
    /// Returns that final block.
    pub fn stop(&mut self) -> Option<Block> {
        if !self.is_running() {
            debug!("stop() ignored, no running session");
            return None;
        }

        let now = self.clock.now();
        let block_length = self.settings.block_length;
        if let Some(start) = self.block_started_at {
            if now - start >= block_length {
                self.complete_full_block(start + block_length, now);
            }
        }
        // Nothing else that is already due may fire past this point.
        self.cancel_timers();

        let block_start = self.block_started_at.unwrap_or(now);
        let elapsed = (now - block_start).max(Duration::zero());

        let recorded = if elapsed >= self.settings.partial_threshold {
            self.sampler.flush(now);
            let block = self.build_block(now, elapsed.num_seconds() as u64, true);
            self.finish_block(block.clone());
            Some(block)
        } else {
            info!(
                "Discarding block {} ({}s is below the {}s threshold)",
                self.block_number,
                elapsed.num_seconds(),
                self.settings.partial_threshold.num_seconds()
            );
            None
        };

        self.state = EngineState::Idle;
        self.pending_screenshot = None;
        self.capture_request = None;
        if let Some(session) = self.session.as_mut() {
            session.stopped_at = Some(now);
        }
        if let Err(e) = self.store.clear_snapshot() {
            warn!("Failed to clear snapshot: {}", e);
        }

        info!("Stopped. Blocks completed: {}", self.completed.len());
        self.events.publish(EngineEvent::StateChanged(EngineState::Idle));
        recorded
    }

    /// Discard the stopped session and its blocks. No-op while running.
    pub fn reset(&mut self) -> bool {
        if self.is_running() {
            debug!("reset() ignored while running, stop first");
            return false;
        }

        self.cancel_timers();
        self.session = None;
        self.block_number = 0;
        self.block_started_at = None;
        self.completed.clear();
        self.sampler = ActivitySampler::new();
        self.armed_shot = None;
        self.pending_screenshot = None;
        self.capture_request = None;
        if let Err(e) = self.store.clear_snapshot() {
            warn!("Failed to clear snapshot: {}", e);
        }
        info!("Reset");
        true
    }

    /// Whole seconds since the session started (frozen once stopped)
    pub fn elapsed_seconds(&self) -> u64 {
        match &self.session {
            Some(session) => {
                let end = session.stopped_at.unwrap_or_else(|| self.clock.now());
                seconds(end - session.started_at)
            }
            None => 0,
        }
    }

    /// Whole seconds into the current block, 0 when not running
    pub fn block_elapsed_seconds(&self) -> u64 {
        match (self.state, self.block_started_at) {
            (EngineState::Running, Some(start)) => seconds(self.clock.now() - start),
            _ => 0,
        }
    }

    /// Fraction of the current block elapsed, 0.0..=1.0
    pub fn current_block_progress(&self) -> f64 {
        let length = self.settings.block_length.num_seconds().max(1) as f64;
        (self.block_elapsed_seconds() as f64 / length).min(1.0)
    }

    /// Count a raw input signal toward the current sampling window
    pub fn record_activity(&mut self, kind: ActivityKind) {
        if self.is_running() {
            self.sampler.record(kind);
        }
    }

    /// Earliest pending timer, `None` when idle
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        if !self.is_running() {
            return None;
        }
        self.scheduler.next_deadline()
    }

    /// Run every timer due at the clock's current time. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        while self.is_running() {
            let Some(timer) = self.scheduler.pop_due(now) else {
                break;
            };
            fired += 1;
            self.handle_timer(timer, now);
        }
        fired
    }

    /// The pending capture for the current block, if its instant has passed
    pub fn take_capture_request(&mut self) -> Option<CaptureRequest> {
        self.capture_request.take()
    }

    /// Attach a capture result. Results for a block that already ended (or a
    /// different session) are discarded.
    pub fn attach_screenshot(&mut self, request: &CaptureRequest, shot: Option<Screenshot>) -> bool {
        let Some(shot) = shot else {
            debug!("No screenshot for block {}", request.block_number);
            return false;
        };

        let current = self.is_running()
            && self.block_number == request.block_number
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.session_id == request.session_id);
        if !current {
            debug!(
                "Discarding late screenshot for block {} of session {}",
                request.block_number, request.session_id
            );
            return false;
        }
        if self.pending_screenshot.is_some() {
            debug!("Block {} already has a screenshot", request.block_number);
            return false;
        }

        info!("Screenshot captured for block {}", request.block_number);
        self.pending_screenshot = Some(shot);
        true
    }

    /// The snapshot that would be persisted right now, if running
    pub fn snapshot(&self) -> Option<Snapshot> {
        if !self.is_running() {
            return None;
        }
        let session = self.session.as_ref()?;
        Some(Snapshot {
            version: SNAPSHOT_VERSION,
            state: self.state,
            session_id: session.session_id.clone(),
            project_ref: session.project_ref.clone(),
            memo: session.memo.clone(),
            session_started_at: session.started_at,
            block_number: self.block_number,
            block_started_at: self.block_started_at?,
            completed_blocks: self.completed.iter().map(Block::redacted).collect(),
            saved_at: self.clock.now(),
        })
    }

    fn handle_timer(&mut self, timer: Fired<TimerKind>, now: DateTime<Utc>) {
        match timer.kind {
            TimerKind::Tick => self.emit_tick(),
            TimerKind::Sample => self.sampler.sample(timer.deadline),
            TimerKind::SnapshotFlush => self.save_snapshot(),
            TimerKind::Screenshot => self.screenshot_due(),
            TimerKind::BlockBoundary => self.complete_full_block(timer.deadline, now),
        }
    }

    fn emit_tick(&self) {
        self.events.publish(EngineEvent::Tick(TickInfo {
            total_elapsed_secs: self.elapsed_seconds(),
            block_elapsed_secs: self.block_elapsed_seconds(),
            block_progress: self.current_block_progress(),
            block_number: self.block_number,
            completed_blocks: self.completed.len(),
            live_activity_percent: self.sampler.live_percent(),
        }));
    }

    fn screenshot_due(&mut self) {
        self.screenshot_timer = None;
        if self.screenshot_taken {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        self.screenshot_taken = true;

        let request = CaptureRequest {
            session_id: session.session_id.clone(),
            block_number: self.block_number,
        };
        debug!("Screenshot triggered for block {}", self.block_number);
        self.events.publish(EngineEvent::ScreenshotNeeded {
            session_id: request.session_id.clone(),
            block_number: request.block_number,
        });
        self.capture_request = Some(request);
    }

    /// Boundary handler. `boundary` is the scheduled instant, which becomes
    /// the next block's start regardless of how late the timer ran.
    fn complete_full_block(&mut self, boundary: DateTime<Utc>, now: DateTime<Utc>) {
        self.boundary_timer = None;
        self.sampler.flush(boundary);
        let block = self.build_block(
            boundary,
            self.settings.block_length.num_seconds() as u64,
            false,
        );
        self.finish_block(block);

        self.block_number += 1;
        let mut next_start = boundary;

        // The host was suspended across whole blocks with the process alive.
        let missed = whole_blocks(now - boundary, self.settings.block_length);
        if missed > 0 {
            warn!(
                "Boundary ran {}s late, recording {} missed blocks",
                (now - boundary).num_seconds(),
                missed
            );
            self.synthesize_missed(next_start, missed);
            next_start += self.settings.block_length * missed as i32;
        }

        self.block_started_at = Some(next_start);
        self.sampler.reset_block(next_start);
        self.arm_block_timers(now);
        self.save_snapshot();
    }

    pub(super) fn build_block(
        &mut self,
        ended_at: DateTime<Utc>,
        duration_seconds: u64,
        is_partial: bool,
    ) -> Block {
        let activity = self.sampler.block_activity();
        let screenshot = self.pending_screenshot.take();
        self.capture_request = None;

        Block {
            block_number: self.block_number,
            started_at: self.block_started_at.unwrap_or(ended_at),
            ended_at,
            duration_seconds,
            activity_percent: activity.percent,
            activity: activity.counts,
            screenshot_meta: screenshot.as_ref().map(Screenshot::meta),
            screenshot,
            is_partial,
            is_missed: false,
        }
    }

    /// Append, persist and announce a finalized block
    pub(super) fn finish_block(&mut self, block: Block) {
        let session_id = self
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default();

        if let Err(e) = self.store.record_completed_block(&session_id, &block) {
            warn!("Failed to record block {}: {}", block.block_number, e);
        }

        info!(
            "Block {} completed{}{} ({}s, activity {}%, screenshot: {})",
            block.block_number,
            if block.is_partial { " (partial)" } else { "" },
            if block.is_missed { " (missed)" } else { "" },
            block.duration_seconds,
            block.activity_percent,
            if block.has_screenshot() { "yes" } else { "no" }
        );

        self.completed.push(block.clone());
        self.events.publish(EngineEvent::BlockCompleted { session_id, block });
    }

    /// Register tick, sampling and snapshot timers
    pub(super) fn arm_periodic(&mut self, now: DateTime<Utc>) {
        self.scheduler.cancel_all();
        self.scheduler
            .every(now, self.settings.tick_interval, TimerKind::Tick);
        self.scheduler
            .every(now, self.settings.sample_interval, TimerKind::Sample);
        self.scheduler
            .every(now, self.settings.snapshot_interval, TimerKind::SnapshotFlush);
    }

    /// Arm the current block's screenshot and boundary timers
    pub(super) fn arm_block_timers(&mut self, now: DateTime<Utc>) {
        if let Some(id) = self.screenshot_timer.take() {
            self.scheduler.cancel(id);
        }
        if let Some(id) = self.boundary_timer.take() {
            self.scheduler.cancel(id);
        }
        self.screenshot_taken = false;
        self.pending_screenshot = None;
        self.capture_request = None;

        let block_start = self.block_started_at.unwrap_or(now);
        let block_end = block_start + self.settings.block_length;

        let shot = self.screenshots.arm(block_start, now, &mut self.rng);
        if shot.fire_at < block_end {
            self.screenshot_timer = Some(self.scheduler.at(shot.fire_at, TimerKind::Screenshot));
        } else {
            debug!(
                "Block {} ends before its screenshot instant, skipping capture",
                self.block_number
            );
        }
        self.armed_shot = Some(shot);
        self.boundary_timer = Some(self.scheduler.at(block_end, TimerKind::BlockBoundary));
    }

    fn cancel_timers(&mut self) {
        self.scheduler.cancel_all();
        self.boundary_timer = None;
        self.screenshot_timer = None;
    }

    pub(super) fn save_snapshot(&self) {
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            warn!("Failed to save snapshot: {}", e);
        }
    }
}

/// How many whole `block_length`s fit in `elapsed`
pub(super) fn whole_blocks(elapsed: Duration, block_length: Duration) -> u32 {
    let elapsed_ms = elapsed.num_milliseconds();
    let block_ms = block_length.num_milliseconds();
    if elapsed_ms <= 0 || block_ms <= 0 {
        return 0;
    }
    u32::try_from(elapsed_ms / block_ms).unwrap_or(u32::MAX)
}

fn seconds(duration: Duration) -> u64 {
    duration.num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::super::testing::{block_events, Harness};
    use super::*;
    use crate::activity::ActivityKind;

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    #[test]
    fn test_one_full_block_after_block_length() {
        let mut h = Harness::new();
        h.engine.start("edge-energy", "layout");
        h.advance(secs(600));

        let blocks = block_events(&h.events);
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.block_number, 1);
        assert!(!block.is_partial);
        assert!(!block.is_missed);
        assert_eq!(block.duration_seconds, 600);
        assert_eq!(block.started_at, h.t0);
        assert_eq!(block.ended_at, h.t0 + secs(600));
        assert_eq!(h.engine.block_number(), 2);
    }

    #[test]
    fn test_full_blocks_are_contiguous_and_exact() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(3 * 600 + 42));

        let blocks = block_events(&h.events);
        assert_eq!(blocks.len(), 3);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.block_number, i as u32 + 1);
            assert_eq!(block.duration_seconds, 600);
            assert_eq!(block.started_at, h.t0 + secs(600 * i as i64));
            assert_eq!(block.ended_at - block.started_at, secs(600));
        }
        assert_eq!(h.engine.block_elapsed_seconds(), 42);
        assert_eq!(h.engine.elapsed_seconds(), 1842);
    }

    #[test]
    fn test_stop_at_threshold_records_partial_block() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(300));

        let partial = h.engine.stop().expect("partial block");
        assert!(partial.is_partial);
        assert_eq!(partial.duration_seconds, 300);
        assert_eq!(partial.block_number, 1);
        assert_eq!(h.store.recorded_blocks().len(), 1);
        assert_eq!(h.engine.state(), EngineState::Idle);
        assert_eq!(h.engine.completed_blocks().len(), 1);
    }

    #[test]
    fn test_stop_below_threshold_records_nothing() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(240));

        assert!(h.engine.stop().is_none());
        h.drain();
        assert!(block_events(&h.events).is_empty());
        assert!(h.store.recorded_blocks().is_empty());
        assert!(h.store.snapshot().is_none());
    }

    #[test]
    fn test_partial_after_full_blocks_keeps_earlier_blocks() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(600 + 450));
        h.engine.stop();

        let blocks = h.engine.completed_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(!blocks[0].is_partial);
        assert!(blocks[1].is_partial);
        assert_eq!(blocks[1].block_number, 2);
        assert_eq!(blocks[1].duration_seconds, 450);
        assert_eq!(blocks[1].started_at, h.t0 + secs(600));
    }

    #[test]
    fn test_no_events_after_stop() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(100));
        h.engine.stop();
        h.drain();
        h.events.clear();

        h.advance(secs(3 * 600));
        assert!(h.events.is_empty(), "{:?}", h.events);
        assert!(h.engine.next_deadline().is_none());
    }

    #[test]
    fn test_due_timers_do_not_fire_after_stop() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.drain();
        h.events.clear();

        // The boundary and screenshot are overdue but nobody polled yet.
        h.clock.advance(secs(650));
        // The 50s left after the boundary is below the threshold.
        assert!(h.engine.stop().is_none());
        assert_eq!(h.engine.poll(), 0);
        h.drain();

        assert!(!h
            .events
            .iter()
            .any(|(_, e)| matches!(e, EngineEvent::ScreenshotNeeded { .. })));
        let blocks = block_events(&h.events);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].is_partial);
        assert_eq!(blocks[0].duration_seconds, 600);
        assert_eq!(blocks[0].ended_at, h.t0 + secs(600));
    }

    #[test]
    fn test_stop_after_suspend_accounts_for_whole_gap() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.drain();
        h.events.clear();

        // Host slept for 2.5 blocks; stop arrives before any poll.
        h.clock.advance(secs(1500));
        let last = h.engine.stop().unwrap();
        assert_eq!(h.engine.poll(), 0);
        h.drain();

        let blocks = block_events(&h.events);
        let summary: Vec<_> = blocks
            .iter()
            .map(|b| (b.block_number, b.duration_seconds, b.is_partial, b.is_missed))
            .collect();
        assert_eq!(
            summary,
            vec![(1, 600, false, false), (2, 600, false, true), (3, 300, true, false)]
        );
        assert_eq!(
            blocks.iter().map(|b| b.duration_seconds).sum::<u64>(),
            1500
        );
        assert_eq!(blocks[2].started_at, h.t0 + secs(1200));
        assert_eq!(blocks[2].ended_at, h.t0 + secs(1500));

        assert_eq!(last.block_number, 3);
        assert!(last.is_partial);
        assert_eq!(last.duration_seconds, 300);
        assert_eq!(h.engine.completed_blocks().len(), 3);
        assert_eq!(h.engine.state(), EngineState::Idle);
        assert!(h.store.snapshot().is_none());
    }

    #[test]
    fn test_duplicate_calls_are_no_ops() {
        let mut h = Harness::new();
        assert!(h.engine.stop().is_none());

        assert!(h.engine.start("p", ""));
        let session_id = h.engine.session().unwrap().session_id.clone();
        assert!(!h.engine.start("other", ""));
        assert_eq!(h.engine.session().unwrap().session_id, session_id);
        assert!(!h.engine.reset());

        h.engine.stop();
        assert!(h.engine.stop().is_none());
    }

    #[test]
    fn test_reset_clears_stopped_session() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(950));
        h.engine.stop();
        assert_eq!(h.engine.completed_blocks().len(), 2);

        assert!(h.engine.reset());
        assert!(h.engine.completed_blocks().is_empty());
        assert!(h.engine.session().is_none());
        assert_eq!(h.engine.elapsed_seconds(), 0);
    }

    #[test]
    fn test_state_changes_are_announced() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.engine.stop();
        h.drain();

        let states: Vec<_> = h
            .events
            .iter()
            .filter_map(|(_, e)| match e {
                EngineEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![EngineState::Running, EngineState::Idle]);
    }

    #[test]
    fn test_one_screenshot_request_per_block_inside_window() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(5 * 600));

        let requests: Vec<_> = h
            .events
            .iter()
            .filter_map(|(at, e)| match e {
                EngineEvent::ScreenshotNeeded { block_number, .. } => Some((*at, *block_number)),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 5);

        for (at, block_number) in requests {
            let block_start = h.t0 + secs(600 * (block_number as i64 - 1));
            let offset = at - block_start;
            assert!(offset >= secs(120) && offset <= secs(540), "{:?}", offset);
        }
    }

    #[test]
    fn test_early_stop_skips_screenshot() {
        let mut h = Harness::with_settings(|s| {
            s.partial_threshold = secs(60);
        });
        h.engine.start("p", "");
        h.advance(secs(100));
        let block = h.engine.stop().unwrap();

        assert!(block.screenshot.is_none());
        assert!(!h
            .events
            .iter()
            .any(|(_, e)| matches!(e, EngineEvent::ScreenshotNeeded { .. })));
    }

    #[test]
    fn test_screenshot_attaches_to_current_block() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(541));

        let request = h.engine.take_capture_request().expect("capture due");
        assert_eq!(request.block_number, 1);
        assert!(h.engine.take_capture_request().is_none());

        let shot = Screenshot::new(vec![0xFF, 0xD8], 1, 1, h.clock.now());
        assert!(h.engine.attach_screenshot(&request, Some(shot.clone())));
        assert!(!h.engine.attach_screenshot(&request, Some(shot.clone())));

        h.advance(secs(59));
        let blocks = block_events(&h.events);
        assert_eq!(blocks[0].screenshot.as_ref(), Some(&shot));
        assert_eq!(blocks[0].screenshot_meta, Some(shot.meta()));
    }

    #[test]
    fn test_late_screenshot_is_discarded() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(541));
        let request = h.engine.take_capture_request().unwrap();

        // The capture is slow and the block ends first.
        h.advance(secs(60));
        let shot = Screenshot::new(vec![1], 1, 1, h.clock.now());
        assert!(!h.engine.attach_screenshot(&request, Some(shot)));

        let blocks = block_events(&h.events);
        assert!(blocks[0].screenshot.is_none());
        h.advance(secs(600));
        assert!(block_events(&h.events)[1].screenshot.is_none());
    }

    #[test]
    fn test_declined_capture_leaves_block_without_screenshot() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(541));
        let request = h.engine.take_capture_request().unwrap();
        assert!(!h.engine.attach_screenshot(&request, None));
        h.advance(secs(59));
        assert!(block_events(&h.events)[0].screenshot.is_none());
    }

    #[test]
    fn test_activity_percent_is_share_of_active_windows() {
        let mut h = Harness::new();
        h.engine.start("p", "");

        // Input in every other 10s window for the whole block.
        for window in 0..60 {
            h.advance(secs(5));
            if window % 2 == 0 {
                h.engine.record_activity(ActivityKind::Keyboard);
                h.engine.record_activity(ActivityKind::Keyboard);
            }
            h.advance(secs(5));
        }

        let block = &block_events(&h.events)[0];
        assert_eq!(block.activity_percent, 50);
        assert_eq!(block.activity.keyboard, 60);
    }

    #[test]
    fn test_activity_resets_each_block() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        for _ in 0..60 {
            h.advance(secs(5));
            h.engine.record_activity(ActivityKind::Click);
            h.advance(secs(5));
        }
        h.advance(secs(600));

        let blocks = block_events(&h.events);
        assert_eq!(blocks[0].activity_percent, 100);
        assert_eq!(blocks[1].activity_percent, 0);
        assert_eq!(blocks[1].activity.clicks, 0);
    }

    #[test]
    fn test_activity_ignored_when_idle() {
        let mut h = Harness::new();
        h.engine.record_activity(ActivityKind::Keyboard);
        h.engine.start("p", "");
        h.advance(secs(600));
        assert_eq!(block_events(&h.events)[0].activity.keyboard, 0);
    }

    #[test]
    fn test_snapshot_lifecycle() {
        let mut h = Harness::new();
        h.engine.start("edge-energy", "memo");

        let snapshot = h.store.snapshot().expect("written on start");
        assert!(snapshot.is_running());
        assert_eq!(snapshot.block_number, 1);
        assert_eq!(snapshot.block_started_at, h.t0);
        assert_eq!(snapshot.project_ref, "edge-energy");

        h.advance(secs(541));
        let request = h.engine.take_capture_request().unwrap();
        let shot = Screenshot::new(vec![9; 64], 8, 8, h.clock.now());
        h.engine.attach_screenshot(&request, Some(shot));
        h.advance(secs(60));

        let snapshot = h.store.snapshot().unwrap();
        assert_eq!(snapshot.block_number, 2);
        assert_eq!(snapshot.completed_blocks.len(), 1);
        assert!(snapshot.completed_blocks[0].screenshot.is_none());
        assert!(snapshot.completed_blocks[0].screenshot_meta.is_some());

        h.engine.stop();
        assert!(h.store.snapshot().is_none());
    }

    #[test]
    fn test_snapshot_rewritten_periodically() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        let writes = h.store.snapshot_writes();
        h.advance(secs(60));
        assert_eq!(h.store.snapshot_writes(), writes + 6);
        assert_eq!(h.store.snapshot().unwrap().saved_at, h.t0 + secs(60));
    }

    #[test]
    fn test_ticks_report_progress() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.advance(secs(300));

        let ticks: Vec<_> = h
            .events
            .iter()
            .filter_map(|(_, e)| match e {
                EngineEvent::Tick(info) => Some(*info),
                _ => None,
            })
            .collect();
        assert_eq!(ticks.len(), 300);
        let last = ticks.last().unwrap();
        assert_eq!(last.total_elapsed_secs, 300);
        assert_eq!(last.block_number, 1);
        assert!((last.block_progress - 0.5).abs() < 1e-9);
        assert!((h.engine.current_block_progress() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overdue_boundary_records_missed_blocks() {
        let mut h = Harness::new();
        h.engine.start("p", "");
        h.drain();

        // Host slept through 2.5 blocks with the process alive.
        h.clock.advance(secs(1500));
        h.engine.poll();
        h.drain();

        let blocks = block_events(&h.events);
        assert_eq!(blocks.len(), 2);
        assert!(!blocks[0].is_missed);
        assert_eq!(blocks[0].duration_seconds, 600);
        assert!(blocks[1].is_missed);
        assert_eq!(blocks[1].block_number, 2);
        assert_eq!(blocks[1].started_at, h.t0 + secs(600));
        assert_eq!(h.engine.block_number(), 3);
        assert_eq!(h.engine.current_block_started_at(), Some(h.t0 + secs(1200)));
        assert_eq!(h.engine.block_elapsed_seconds(), 300);
    }

    #[test]
    fn test_store_failures_do_not_stop_the_timer() {
        let mut h = Harness::new();
        h.store.set_fail_writes(true);
        h.engine.start("p", "");
        h.advance(secs(1200));

        assert!(h.engine.is_running());
        assert_eq!(block_events(&h.events).len(), 2);
        assert!(h.store.recorded_blocks().is_empty());
    }

    #[test]
    fn test_whole_blocks() {
        assert_eq!(whole_blocks(secs(0), secs(600)), 0);
        assert_eq!(whole_blocks(secs(-5), secs(600)), 0);
        assert_eq!(whole_blocks(secs(599), secs(600)), 0);
        assert_eq!(whole_blocks(secs(600), secs(600)), 1);
        assert_eq!(whole_blocks(secs(1380), secs(600)), 2);
    }
}
