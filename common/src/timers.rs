//! Tick-driven Timer Queue
//!
//! Timers owned by a single protocol entity. The queue keeps its own clock, which only
//! moves when the owner calls [`TimerQueue::advance`]; expired timers are handed back as
//! events so they are processed on the owner's execution context. Dropping or clearing
//! the queue cancels every pending timer synchronously.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::trace;

/// Handle of a running timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deadline-ordered queue of one-shot timers carrying an event of type `E`
#[derive(Debug)]
pub struct TimerQueue<E> {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, TimerId), E>,
    deadlines: HashMap<TimerId, Duration>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerQueue<E> {
    /// Create an empty queue with its clock at zero
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current time of the queue clock
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Start a timer expiring `duration` from now
    pub fn start(&mut self, duration: Duration, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = self.now + duration;
        self.pending.insert((deadline, id), event);
        self.deadlines.insert(id, deadline);
        trace!("Timer started. id={:?} deadline={:?}", id, deadline);
        id
    }

    /// Stop a timer, returning its event if it was still running
    pub fn stop(&mut self, id: TimerId) -> Option<E> {
        let deadline = self.deadlines.remove(&id)?;
        self.pending.remove(&(deadline, id))
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Number of running timers
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Stop all timers
    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadlines.clear();
    }

    /// Time left until the earliest deadline
    pub fn time_to_next_expiry(&self) -> Option<Duration> {
        self.pending
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_sub(self.now))
    }

    /// Move the clock forward and return the expired timers in deadline order
    pub fn advance(&mut self, elapsed: Duration) -> Vec<(TimerId, E)> {
        self.now += elapsed;

        let mut expired = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > self.now {
                break;
            }
            let ((_, id), event) = entry.remove_entry();
            self.deadlines.remove(&id);
            expired.push((id, event));
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_expiry_order() {
        let mut timers = TimerQueue::new();
        let late = timers.start(Duration::from_millis(30), "late");
        let early = timers.start(Duration::from_millis(10), "early");
        assert_eq!(timers.len(), 2);
        assert_eq!(timers.time_to_next_expiry(), Some(Duration::from_millis(10)));

        assert!(timers.advance(Duration::from_millis(9)).is_empty());
        let expired = timers.advance(Duration::from_millis(25));
        assert_eq!(expired, vec![(early, "early"), (late, "late")]);
        assert!(timers.is_empty());
        assert_eq!(timers.now(), Duration::from_millis(34));
    }

    #[test]
    fn test_timer_stop() {
        let mut timers = TimerQueue::new();
        let id = timers.start(Duration::from_millis(5), 7u32);
        assert!(timers.is_running(id));
        assert_eq!(timers.stop(id), Some(7));
        assert!(!timers.is_running(id));
        assert_eq!(timers.stop(id), None);
        assert!(timers.advance(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn test_zero_duration_timer() {
        let mut timers = TimerQueue::new();
        let id = timers.start(Duration::ZERO, ());
        assert_eq!(timers.advance(Duration::ZERO), vec![(id, ())]);
    }

    #[test]
    fn test_clear() {
        let mut timers = TimerQueue::new();
        timers.start(Duration::from_millis(1), 1);
        timers.start(Duration::from_millis(2), 2);
        timers.clear();
        assert!(timers.is_empty());
        assert!(timers.advance(Duration::from_secs(1)).is_empty());
    }
}
