//! Timer queue: port-keyed deadlines feeding the worker's wait timeout.
//!
//! A small min-heap of `(deadline, port)` pairs with per-entry generation
//! numbers. Re-arming a port pushes a fresh entry and bumps the live
//! generation; stale heap entries are pruned lazily when they surface. This
//! keeps upsert and removal O(log n) without heap surgery.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::OnceLock;
use std::time::Instant;

use crate::port::Port;

/// Milliseconds on the process-wide monotonic clock.
///
/// Timer deadlines passed to the dispatcher are absolute values of this
/// clock; compute them as `monotonic_millis() + delta`.
#[must_use]
pub fn monotonic_millis() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(epoch).as_millis() as i64
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct TimerEntry {
    deadline_ms: i64,
    port: Port,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Port-keyed timer queue.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    live: HashMap<Port, u64>,
    next_generation: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Upserts the timer for `port` when `deadline_ms > 0`, removes it
    /// otherwise.
    pub(crate) fn update(&mut self, port: Port, deadline_ms: i64) {
        if deadline_ms > 0 {
            let generation = self.next_generation;
            self.next_generation += 1;
            self.live.insert(port, generation);
            self.heap.push(TimerEntry {
                deadline_ms,
                port,
                generation,
            });
        } else {
            self.live.remove(&port);
        }
    }

    /// The earliest live `(deadline, port)`, if any.
    pub(crate) fn earliest(&mut self) -> Option<(i64, Port)> {
        self.prune();
        self.heap.peek().map(|e| (e.deadline_ms, e.port))
    }

    /// Removes and returns the earliest timer's port when its deadline is
    /// `<= now_ms`.
    pub(crate) fn pop_due(&mut self, now_ms: i64) -> Option<Port> {
        let (deadline, port) = self.earliest()?;
        if deadline > now_ms {
            return None;
        }
        self.heap.pop();
        self.live.remove(&port);
        Some(port)
    }

    fn prune(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.live.get(&entry.port) == Some(&entry.generation) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_has_no_deadline() {
        let mut timers = TimerQueue::new();
        assert_eq!(timers.earliest(), None);
        assert_eq!(timers.pop_due(i64::MAX), None);
    }

    #[test]
    fn earliest_orders_by_deadline() {
        let mut timers = TimerQueue::new();
        timers.update(1, 300);
        timers.update(2, 100);
        timers.update(3, 200);
        assert_eq!(timers.earliest(), Some((100, 2)));
    }

    #[test]
    fn upsert_replaces_deadline() {
        let mut timers = TimerQueue::new();
        timers.update(1, 100);
        timers.update(1, 500);
        assert_eq!(timers.earliest(), Some((500, 1)));

        // Re-arming earlier wins immediately.
        timers.update(1, 50);
        assert_eq!(timers.earliest(), Some((50, 1)));
    }

    #[test]
    fn non_positive_deadline_removes() {
        let mut timers = TimerQueue::new();
        timers.update(1, 100);
        timers.update(1, 0);
        assert_eq!(timers.earliest(), None);

        timers.update(2, 100);
        timers.update(2, -5);
        assert_eq!(timers.earliest(), None);
    }

    #[test]
    fn pop_due_respects_now() {
        let mut timers = TimerQueue::new();
        timers.update(1, 100);
        timers.update(2, 200);

        assert_eq!(timers.pop_due(99), None);
        assert_eq!(timers.pop_due(100), Some(1));
        assert_eq!(timers.pop_due(100), None);
        assert_eq!(timers.pop_due(250), Some(2));
        assert_eq!(timers.pop_due(250), None);
    }

    #[test]
    fn stale_entries_do_not_resurface() {
        let mut timers = TimerQueue::new();
        timers.update(1, 100);
        timers.update(1, 400);
        timers.update(2, 300);

        assert_eq!(timers.pop_due(500), Some(2));
        assert_eq!(timers.pop_due(500), Some(1));
        assert_eq!(timers.pop_due(500), None);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = monotonic_millis();
        let b = monotonic_millis();
        assert!(b >= a);
    }
}
