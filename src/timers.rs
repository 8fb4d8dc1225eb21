//! Monotonic timer wheel: every connect/inactivity/session/backoff timeout in
//! the router is an absolute deadline registered here. Grounded on the timer
//! ids carried by `xrsr_private.h`'s session state and `jamjam::network::connection`'s
//! `Instant`-based RTT bookkeeping for the "monotonic clock, no wall time" style.
//!
//! Updates replace a deadline atomically; removal cancels the pending fire
//! without running its handler — implemented with a generation counter so a
//! stale heap entry from before a `remove`/`update` is recognized and skipped
//! rather than ever invoked (spec.md §5: "a removed timer's handler will not
//! run after removal").

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::model::Source;

/// Which timeout this id refers to, within one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Connect,
    ConnectCheckInterval,
    Inactivity,
    SessionDeadline,
    Backoff,
}

/// Stable identity for a timer: which destination of which source, and which
/// kind of timeout. Timer handlers carry this id rather than a direct
/// reference into the FSM (spec.md §9's "arena + stable id" pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub source: Source,
    pub dst_index: usize,
    pub kind: TimerKind,
}

struct Entry {
    deadline: Instant,
    generation: u64,
}

/// A monotonic priority queue of `(deadline, TimerId)`.
#[derive(Default)]
pub struct TimerWheel {
    live: HashMap<TimerId, Entry>,
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    next_generation: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `id` to fire at `deadline`. Replaces any existing
    /// deadline for this id atomically from the caller's point of view.
    pub fn insert(&mut self, id: TimerId, deadline: Instant) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.live.insert(id, Entry { deadline, generation });
        self.heap.push(Reverse((deadline, generation, id)));
    }

    /// Alias for `insert` — timer updates and fresh arms are the same
    /// operation here; kept as a separate name to mirror spec.md §4.1's
    /// "insert, update, remove, next" vocabulary at call sites.
    pub fn update(&mut self, id: TimerId, deadline: Instant) {
        self.insert(id, deadline);
    }

    /// Cancel a pending timer.
    pub fn remove(&mut self, id: TimerId) -> Result<(), crate::error::TimerError> {
        if self.live.remove(&id).is_none() {
            return Err(crate::error::TimerError::NotFound(id));
        }
        Ok(())
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.live.contains_key(&id)
    }

    /// The nearest deadline among all still-armed timers, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return every timer whose deadline is `<= now`, in deadline
    /// order. Timers removed or superseded since being queued are silently
    /// dropped rather than returned.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        loop {
            let Some(Reverse((deadline, generation, id))) = self.heap.peek().copied() else {
                break;
            };
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(entry) = self.live.get(&id) {
                if entry.generation == generation {
                    self.live.remove(&id);
                    fired.push(id);
                }
            }
        }
        fired
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((_, generation, id))) = self.heap.peek().copied() {
            let still_live = self.live.get(&id).is_some_and(|e| e.generation == generation);
            if still_live {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(kind: TimerKind) -> TimerId {
        TimerId { source: Source::LocalMic, dst_index: 0, kind }
    }

    #[test]
    fn next_deadline_is_the_soonest() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.insert(id(TimerKind::Connect), now + Duration::from_secs(5));
        wheel.insert(id(TimerKind::Inactivity), now + Duration::from_secs(1));
        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn update_replaces_deadline_atomically() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let tid = id(TimerKind::Backoff);
        wheel.insert(tid, now + Duration::from_secs(1));
        wheel.update(tid, now + Duration::from_secs(10));
        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_secs(10)));
        let fired = wheel.pop_expired(now + Duration::from_secs(5));
        assert!(fired.is_empty(), "the stale 1s deadline must not fire");
    }

    #[test]
    fn removed_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let tid = id(TimerKind::SessionDeadline);
        wheel.insert(tid, now + Duration::from_millis(10));
        wheel.remove(tid).unwrap();
        let fired = wheel.pop_expired(now + Duration::from_secs(1));
        assert!(fired.is_empty());
        assert!(!wheel.is_armed(tid));
    }

    #[test]
    fn removing_an_unarmed_timer_reports_not_found() {
        let mut wheel = TimerWheel::new();
        let tid = id(TimerKind::Connect);
        assert!(matches!(wheel.remove(tid), Err(crate::error::TimerError::NotFound(found)) if found == tid));
    }

    #[test]
    fn pop_expired_returns_only_due_timers_in_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let a = TimerId { source: Source::LocalMic, dst_index: 0, kind: TimerKind::Connect };
        let b = TimerId { source: Source::LocalMic, dst_index: 1, kind: TimerKind::Connect };
        wheel.insert(a, now + Duration::from_millis(10));
        wheel.insert(b, now + Duration::from_millis(5));
        let fired = wheel.pop_expired(now + Duration::from_millis(20));
        assert_eq!(fired, vec![b, a]);
    }

    #[test]
    fn reinsert_after_remove_fires_again() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let tid = id(TimerKind::Connect);
        wheel.insert(tid, now + Duration::from_millis(5));
        wheel.remove(tid).unwrap();
        wheel.insert(tid, now + Duration::from_millis(5));
        let fired = wheel.pop_expired(now + Duration::from_millis(10));
        assert_eq!(fired, vec![tid]);
    }
}
