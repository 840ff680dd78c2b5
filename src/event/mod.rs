//! Discrete-event scheduler driving every peripheral.
//!
//! Events are kept in a list ordered by absolute time. Two events posted for the
//! same time fire in the order they were posted. The pool is bounded: when it
//! is full a new event is dropped and a warning is logged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default number of event cells available to the scheduler.
pub const DEFAULT_POOL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<E> {
    pub time: u64,
    pub kind: E,
}

/// How a [`EventQueue::wait_until_interrupt`] drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// An event callback reported a pending interrupt.
    Interrupt,
    /// The queue ran dry.
    Empty,
    /// The host asked the simulation to stop.
    Cancelled,
}

#[derive(Debug)]
pub struct EventQueue<E> {
    now: u64,
    live: VecDeque<Event<E>>,
    capacity: usize,
    dropped: u64,
}

impl<E: Copy + std::fmt::Debug> EventQueue<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            now: 0,
            live: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Current simulated time in cycles.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of events refused because the pool was exhausted.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Time of the earliest pending event.
    pub fn next_time(&self) -> Option<u64> {
        self.live.front().map(|e| e.time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event<E>> {
        self.live.iter()
    }

    /// Posts `kind` to fire `delay` cycles from now.
    ///
    /// Returns false when the pool is exhausted and the event was dropped.
    pub fn schedule(&mut self, kind: E, delay: u64) -> bool {
        if self.live.len() >= self.capacity {
            self.dropped += 1;
            tracing::warn!(?kind, delay, "too many events in event queue, event dropped");
            return false;
        }
        let time = self.now.saturating_add(delay);
        // Insert after every entry scheduled at or before `time` (FIFO among ties).
        let at = self.live.partition_point(|e| e.time <= time);
        self.live.insert(at, Event { time, kind });
        true
    }

    /// Removes every pending event matching `pred`.
    pub fn cancel(&mut self, mut pred: impl FnMut(&E) -> bool) {
        self.live.retain(|e| !pred(&e.kind));
    }

    fn pop_due(&mut self, end: u64) -> Option<Event<E>> {
        match self.live.front() {
            Some(e) if e.time <= end => self.live.pop_front(),
            _ => None,
        }
    }

    /// Advances time by `delta` cycles, firing every event due up to the new time.
    ///
    /// Each callback observes `now()` equal to the time its event was scheduled
    /// for. Callbacks may post new events; those due within the window fire too.
    pub fn advance<F>(&mut self, delta: u64, mut fire: F)
    where
        F: FnMut(&mut Self, E),
    {
        let end = self.now.saturating_add(delta);
        while let Some(ev) = self.pop_due(end) {
            self.now = ev.time;
            fire(self, ev.kind);
        }
        self.now = end;
    }

    /// Power-down drain: fires events regardless of time until `fire` reports a
    /// pending interrupt, the queue empties, or `cancel` is raised.
    ///
    /// Returns the number of cycles that elapsed and why the drain stopped.
    pub fn wait_until_interrupt<F>(&mut self, cancel: &AtomicBool, mut fire: F) -> (u64, WakeReason)
    where
        F: FnMut(&mut Self, E) -> bool,
    {
        let start = self.now;
        let reason = loop {
            let Some(ev) = self.live.pop_front() else {
                break WakeReason::Empty;
            };
            self.now = ev.time;
            if fire(self, ev.kind) {
                break WakeReason::Interrupt;
            }
            if cancel.load(Ordering::Relaxed) {
                break WakeReason::Cancelled;
            }
        };
        (self.now - start, reason)
    }

    /// Drops every pending event and rewinds time to zero.
    pub fn clear(&mut self) {
        self.live.clear();
        self.now = 0;
        self.dropped = 0;
    }
}

impl<E: Copy + std::fmt::Debug> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_see_their_own_timestamp() {
        let mut q = EventQueue::new(8);
        q.schedule('a', 3);
        q.schedule('b', 7);
        let mut seen = vec![];
        q.advance(10, |q, k| seen.push((k, q.now())));
        assert_eq!(seen, vec![('a', 3), ('b', 7)]);
        assert_eq!(q.now(), 10);
    }

    #[test]
    fn events_past_the_window_stay_queued() {
        let mut q = EventQueue::new(8);
        q.schedule(1u8, 5);
        q.schedule(2u8, 6);
        let mut fired = vec![];
        q.advance(5, |_, k| fired.push(k));
        assert_eq!(fired, vec![1]);
        assert_eq!(q.next_time(), Some(6));
    }

    #[test]
    fn rescheduling_inside_window_fires_again() {
        let mut q = EventQueue::new(8);
        q.schedule((), 2);
        let mut count = 0;
        q.advance(9, |q, k| {
            count += 1;
            q.schedule(k, 2);
        });
        // fires at 2, 4, 6, 8
        assert_eq!(count, 4);
        assert_eq!(q.next_time(), Some(10));
    }

    #[test]
    fn exhausted_pool_drops_event() {
        let mut q = EventQueue::new(2);
        assert!(q.schedule(0, 1));
        assert!(q.schedule(1, 1));
        assert!(!q.schedule(2, 1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn wait_until_interrupt_reports_elapsed_time() {
        let mut q = EventQueue::new(8);
        q.schedule(0u32, 100);
        q.schedule(1u32, 250);
        q.schedule(2u32, 400);
        let cancel = AtomicBool::new(false);
        let (elapsed, why) = q.wait_until_interrupt(&cancel, |_, k| k == 1);
        assert_eq!(why, WakeReason::Interrupt);
        assert_eq!(elapsed, 250);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wait_until_interrupt_stops_on_empty_queue() {
        let mut q = EventQueue::<u8>::new(4);
        q.schedule(0, 10);
        let cancel = AtomicBool::new(false);
        assert_eq!(q.wait_until_interrupt(&cancel, |_, _| false), (10, WakeReason::Empty));
    }

    #[test]
    fn wait_until_interrupt_honours_cancel() {
        let mut q = EventQueue::new(4);
        q.schedule(0u8, 10);
        let cancel = AtomicBool::new(true);
        let (_, why) = q.wait_until_interrupt(&cancel, |q, k| {
            q.schedule(k, 10);
            false
        });
        assert_eq!(why, WakeReason::Cancelled);
    }
}
