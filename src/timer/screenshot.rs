//! Picks the one screenshot instant of each block

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Never fire sooner than this after arming, even when the drawn instant has
/// already passed (resume mid-block).
const MIN_LEAD_MS: i64 = 1_000;

/// Where a block's screenshot landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedShot {
    /// Drawn offset from block start, inside the window
    pub offset: Duration,
    /// When the capture signal fires
    pub fire_at: DateTime<Utc>,
}

/// Uniform draw inside `[min_delay, max_delay]` relative to block start
#[derive(Debug, Clone, Copy)]
pub struct ScreenshotScheduler {
    min_delay: Duration,
    max_delay: Duration,
}

impl ScreenshotScheduler {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Draw a delay for the block that started at `block_start`, less whatever
    /// of the block has already elapsed at `now`.
    pub fn arm<R: Rng + ?Sized>(
        &self,
        block_start: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ArmedShot {
        let min_ms = self.min_delay.num_milliseconds();
        let max_ms = self.max_delay.num_milliseconds();
        let offset = Duration::milliseconds(rng.gen_range(min_ms..=max_ms));

        let elapsed = (now - block_start).max(Duration::zero());
        let remaining = (offset - elapsed).max(Duration::milliseconds(MIN_LEAD_MS));

        ArmedShot {
            offset,
            fire_at: now + remaining,
        }
    }
}
