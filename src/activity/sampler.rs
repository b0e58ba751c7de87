//! Presence-based activity sampling
//!
//! Every sampling window asks one question: was there any input since the
//! previous sample? A block's activity percent is the share of windows that
//! answered yes. One keystroke in a window counts the same as continuous
//! typing.

use chrono::{DateTime, Utc};

use super::ActivityKind;
use crate::data::ActivityCounts;

/// Result of a block's sampling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockActivity {
    pub percent: u8,
    pub counts: ActivityCounts,
}

/// Reduces raw input signals to a per-block activity ratio
#[derive(Debug, Clone)]
pub struct ActivitySampler {
    counts: ActivityCounts,
    window_events: u64,
    active_samples: u32,
    total_samples: u32,
    /// Start of the current (unsampled) window
    window_started_at: Option<DateTime<Utc>>,
}

impl ActivitySampler {
    pub fn new() -> Self {
        Self {
            counts: ActivityCounts::default(),
            window_events: 0,
            active_samples: 0,
            total_samples: 0,
            window_started_at: None,
        }
    }

    /// Count one raw input signal
    pub fn record(&mut self, kind: ActivityKind) {
        match kind {
            ActivityKind::Keyboard => self.counts.keyboard += 1,
            ActivityKind::MouseMove => self.counts.mouse += 1,
            ActivityKind::Click => self.counts.clicks += 1,
        }
        self.window_events += 1;
    }

    /// Close the current window at `at`
    pub fn sample(&mut self, at: DateTime<Utc>) {
        self.total_samples += 1;
        if self.window_events > 0 {
            self.active_samples += 1;
        }
        self.window_events = 0;
        self.window_started_at = Some(at);
    }

    /// Take a trailing sample if any time has passed since the last one
    pub fn flush(&mut self, at: DateTime<Utc>) {
        match self.window_started_at {
            Some(started) if at > started => self.sample(at),
            None => self.sample(at),
            _ => {}
        }
    }

    /// Zero all counters for a block starting at `at`
    pub fn reset_block(&mut self, at: DateTime<Utc>) {
        *self = Self::new();
        self.window_started_at = Some(at);
    }

    pub fn total_samples(&self) -> u32 {
        self.total_samples
    }

    pub fn active_samples(&self) -> u32 {
        self.active_samples
    }

    pub fn counts(&self) -> ActivityCounts {
        self.counts
    }

    /// Percent of active windows so far, 0 with no samples
    pub fn live_percent(&self) -> u8 {
        activity_percent(self.active_samples, self.total_samples)
    }

    pub fn block_activity(&self) -> BlockActivity {
        BlockActivity {
            percent: self.live_percent(),
            counts: self.counts,
        }
    }
}

impl Default for ActivitySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// `round(active / total * 100)` clamped to 0..=100; 0 when nothing was sampled
pub fn activity_percent(active: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (f64::from(active) / f64::from(total) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}
