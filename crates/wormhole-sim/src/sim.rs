//! Minimal discrete-event core.
//!
//! Simulated time is an integer count of nanoseconds. Events scheduled for
//! the same instant fire in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(ns: u64) -> Self {
        SimTime(ns)
    }

    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms.saturating_mul(1_000_000))
    }

    /// Converts seconds to simulated time, rejecting negative or non-finite input.
    pub fn try_from_secs(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(SimError::config(format!(
                "simulated time must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(SimTime((secs * 1e9).round() as u64))
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        let ns = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        SimTime(self.0.saturating_add(ns))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}s", self.as_secs_f64())
    }
}

struct Scheduled<E> {
    at: SimTime,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // BinaryHeap is a max-heap; invert so the earliest event pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered event queue owning the simulation clock.
pub struct EventQueue<E> {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Scheduled<E>>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            heap: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules `event` at `at`. Times in the past are clamped to now.
    pub fn schedule(&mut self, at: SimTime, event: E) {
        let at = at.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, event });
    }

    pub fn schedule_in(&mut self, delay: Duration, event: E) {
        let at = self.now.saturating_add(delay);
        self.schedule(at, event);
    }

    /// Pops the next event if it fires no later than `limit`, advancing the clock.
    pub fn pop_until(&mut self, limit: SimTime) -> Option<(SimTime, E)> {
        if self.heap.peek()?.at > limit {
            return None;
        }
        let next = self.heap.pop()?;
        self.now = next.at;
        Some((next.at, next.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pop_in_time_then_fifo_order() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_millis(20), "late");
        q.schedule(SimTime::from_millis(10), "first");
        q.schedule(SimTime::from_millis(10), "second");

        let order: Vec<_> = std::iter::from_fn(|| q.pop_until(SimTime::from_millis(100)))
            .map(|(_, e)| e)
            .collect();
        assert_eq!(order, vec!["first", "second", "late"]);
        assert_eq!(q.now(), SimTime::from_millis(20));
    }

    #[test]
    fn pop_until_respects_limit() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_millis(5), 1);
        q.schedule(SimTime::from_millis(15), 2);
        assert_eq!(q.pop_until(SimTime::from_millis(10)), Some((SimTime::from_millis(5), 1)));
        assert_eq!(q.pop_until(SimTime::from_millis(10)), None);
        assert_eq!(q.pop_until(SimTime::from_millis(20)), Some((SimTime::from_millis(15), 2)));
    }

    #[test]
    fn past_events_are_clamped_to_now() {
        let mut q = EventQueue::new();
        q.schedule(SimTime::from_millis(50), 'a');
        q.pop_until(SimTime::from_millis(50));
        q.schedule(SimTime::from_millis(1), 'b');
        assert_eq!(q.pop_until(SimTime::from_millis(60)), Some((SimTime::from_millis(50), 'b')));
    }

    #[test]
    fn seconds_conversion_rejects_negative() {
        assert_eq!(SimTime::try_from_secs(2.5).unwrap(), SimTime(2_500_000_000));
        assert!(SimTime::try_from_secs(-0.1).is_err());
        assert!(SimTime::try_from_secs(f64::NAN).is_err());
        assert_eq!(SimTime(2_500_000_000).to_string(), "+2.5s");
    }
}
