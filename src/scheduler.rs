//! Deadline scheduler for one-shot and periodic timers
//!
//! The engine arms timers here instead of spawning sleeps. Whoever hosts the
//! engine asks for [`Scheduler::next_deadline`], waits until then, and pops the
//! due timers in order. Cancellation removes a timer from the live set, so a
//! timer that was already due when it got cancelled never pops.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Handle returned when arming a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A timer that came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub id: TimerId,
    pub kind: K,
    /// The instant the timer was scheduled for (not when it was popped)
    pub deadline: DateTime<Utc>,
}

#[derive(Debug)]
struct Live<K> {
    kind: K,
    period: Option<Duration>,
    deadline: DateTime<Utc>,
}

#[derive(Debug)]
struct HeapEntry {
    deadline: DateTime<Utc>,
    id: TimerId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for HeapEntry {}

/// Timer set keyed by `K`
#[derive(Debug)]
pub struct Scheduler<K> {
    heap: BinaryHeap<HeapEntry>,
    live: HashMap<TimerId, Live<K>>,
    next_id: u64,
}

impl<K: Clone> Scheduler<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_id: 0,
        }
    }

    /// Fire once, `delay` after `now`
    pub fn after(&mut self, now: DateTime<Utc>, delay: Duration, kind: K) -> TimerId {
        self.at(now + delay.max(Duration::zero()), kind)
    }

    /// Fire once at `deadline`
    pub fn at(&mut self, deadline: DateTime<Utc>, kind: K) -> TimerId {
        self.insert(deadline, None, kind)
    }

    /// Fire every `period`, first at `now + period`
    pub fn every(&mut self, now: DateTime<Utc>, period: Duration, kind: K) -> TimerId {
        self.insert(now + period, Some(period), kind)
    }

    /// Cancel a timer. Returns false if it had already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        // Stale heap entries are skipped lazily in `pop_due`.
        self.live.remove(&id).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.heap.clear();
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Earliest deadline among live timers
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.discard_stale();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Pop the earliest timer whose deadline is at or before `now`.
    ///
    /// Periodic timers are re-armed at `deadline + period`; ticks that would
    /// already be in the past are skipped rather than replayed.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Fired<K>> {
        self.discard_stale();
        let entry = self.heap.peek()?;
        if entry.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        let live = self.live.get(&entry.id)?;
        let period = live.period;
        let fired = Fired {
            id: entry.id,
            kind: live.kind.clone(),
            deadline: entry.deadline,
        };

        match period {
            Some(period) if period > Duration::zero() => {
                let mut next = entry.deadline + period;
                if next <= now {
                    let behind = (now - entry.deadline).num_milliseconds();
                    let step = period.num_milliseconds().max(1);
                    next = entry.deadline + Duration::milliseconds((behind / step + 1) * step);
                }
                if let Some(live) = self.live.get_mut(&entry.id) {
                    live.deadline = next;
                }
                self.heap.push(HeapEntry {
                    deadline: next,
                    id: entry.id,
                });
            }
            _ => {
                self.live.remove(&entry.id);
            }
        }

        Some(fired)
    }

    fn insert(&mut self, deadline: DateTime<Utc>, period: Option<Duration>, kind: K) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.live.insert(
            id,
            Live {
                kind,
                period,
                deadline,
            },
        );
        self.heap.push(HeapEntry { deadline, id });
        id
    }

    /// Drop heap entries whose timer was cancelled or re-armed elsewhere
    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            match self.live.get(&top.id) {
                Some(live) if live.deadline == top.deadline => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

impl<K: Clone> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_pops_in_deadline_then_id_order() {
        let mut sched = Scheduler::new();
        sched.after(t0(), Duration::seconds(20), "late");
        sched.after(t0(), Duration::seconds(10), "first");
        sched.after(t0(), Duration::seconds(10), "second");

        let now = t0() + Duration::seconds(30);
        let order: Vec<_> = std::iter::from_fn(|| sched.pop_due(now))
            .map(|fired| fired.kind)
            .collect();
        assert_eq!(order, vec!["first", "second", "late"]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_nothing_pops_before_deadline() {
        let mut sched = Scheduler::new();
        sched.after(t0(), Duration::seconds(5), ());
        assert!(sched.pop_due(t0() + Duration::seconds(4)).is_none());
        assert_eq!(sched.next_deadline(), Some(t0() + Duration::seconds(5)));
    }

    #[test]
    fn test_cancelled_timer_never_fires_even_when_due() {
        let mut sched = Scheduler::new();
        let id = sched.after(t0(), Duration::seconds(5), "boundary");
        let now = t0() + Duration::seconds(10);

        assert!(sched.cancel(id));
        assert!(!sched.cancel(id));
        assert!(sched.pop_due(now).is_none());
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn test_periodic_reports_scheduled_deadline() {
        let mut sched = Scheduler::new();
        sched.every(t0(), Duration::seconds(10), "sample");

        let fired = sched.pop_due(t0() + Duration::seconds(10)).unwrap();
        assert_eq!(fired.deadline, t0() + Duration::seconds(10));
        assert_eq!(sched.next_deadline(), Some(t0() + Duration::seconds(20)));
    }

    #[test]
    fn test_periodic_skips_missed_ticks() {
        let mut sched = Scheduler::new();
        sched.every(t0(), Duration::seconds(10), "sample");

        // Host slept for a minute and a bit.
        let now = t0() + Duration::seconds(65);
        assert!(sched.pop_due(now).is_some());
        assert!(sched.pop_due(now).is_none());
        assert_eq!(sched.next_deadline(), Some(t0() + Duration::seconds(70)));
    }

    #[test]
    fn test_cancel_all_clears_everything() {
        let mut sched = Scheduler::new();
        sched.every(t0(), Duration::seconds(1), 1);
        sched.after(t0(), Duration::seconds(2), 2);
        sched.cancel_all();
        assert!(sched.pop_due(t0() + Duration::hours(1)).is_none());
        assert!(sched.is_empty());
    }
}
