//! Deferred continuations for the single-threaded window loop.
//!
//! Anything that "waits" (lock release, indicator reset, the focus grace
//! before arbitration) is queued here with a due instant and run by the loop
//! on the first tick at or after that instant.

use std::time::Instant;

/// Min-ordered queue of `(due, item)` pairs. Items due at the same instant
/// come out in insertion order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: Vec<(Instant, u64, T)>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let pos = self
            .entries
            .partition_point(|(at, s, _)| (*at, *s) <= (due, seq));
        self.entries.insert(pos, (due, seq, item));
    }

    /// Remove and return every item due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<T> {
        let split = self.entries.partition_point(|(at, _, _)| *at <= now);
        self.entries.drain(..split).map(|(_, _, item)| item).collect()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.entries.first().map(|(at, _, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything still pending; returns the discarded items.
    pub fn clear(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, _, item)| item).collect()
    }
}
