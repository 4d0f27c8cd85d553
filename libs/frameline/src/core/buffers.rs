// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded blocking queue — the inter-thread handoff between connectors.
//!
//! Backpressure lives here: `push` blocks the producer while the queue is
//! at capacity and unblocks as soon as a worker drains one entry. Consumers
//! poll with a timeout so they stay responsive to stop/close signals.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Result of a timed pop.
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult<T> {
    Item(T),
    /// Timed out with nothing available.
    Empty,
    /// The queue was closed and everything buffered has been consumed.
    Closed,
    /// The queue was stopped; pending items are abandoned.
    Stopped,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    stopped: bool,
}

/// Fixed-capacity FIFO queue guarded by a lock plus not-full/not-empty
/// condition variables.
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "queue capacity must be at least 1");
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                stopped: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocking push. Returns `false` (discarding nothing on the caller's
    /// side — the item is handed back conceptually abandoned) only when the
    /// queue has been stopped or closed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity {
            if state.stopped || state.closed {
                return false;
            }
            self.not_full.wait(&mut state);
        }
        if state.stopped || state.closed {
            return false;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Non-blocking push; returns the item back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.stopped || state.closed || state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop with a wait bound. Buffered items are delivered even after
    /// `close`; `Closed` is only reported once the queue has run dry.
    pub fn pop_timeout(&self, timeout: Duration) -> PopResult<T> {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.stopped && !state.closed {
            self.not_empty.wait_for(&mut state, timeout);
        }
        if state.stopped {
            return PopResult::Stopped;
        }
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                PopResult::Item(item)
            }
            None if state.closed => PopResult::Closed,
            None => PopResult::Empty,
        }
    }

    /// Signal end-of-stream: no further pushes succeed, buffered items
    /// still drain.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Abort: unblock everyone and abandon buffered items.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.items.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Discard buffered items without changing close/stop state (seek).
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        self.not_full.notify_all();
    }

    /// Reopen a closed queue for another pass (loop restart).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.closed = false;
        state.stopped = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            assert!(q.try_push(i).is_ok());
        }
        assert!(q.try_push(99).is_err());
        for i in 0..4 {
            assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Item(i));
        }
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Empty);
    }

    #[test]
    fn push_blocks_until_consumer_drains_one_entry() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(q.push(0));

        let unblocked = Arc::new(AtomicBool::new(false));
        let producer = {
            let q = Arc::clone(&q);
            let unblocked = Arc::clone(&unblocked);
            std::thread::spawn(move || {
                // Queue is full: this must block, not drop.
                assert!(q.push(1));
                unblocked.store(true, Ordering::Release);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!unblocked.load(Ordering::Acquire), "push returned early");

        assert_eq!(q.pop_timeout(Duration::from_millis(10)), PopResult::Item(0));
        producer.join().unwrap();
        assert!(unblocked.load(Ordering::Acquire));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), PopResult::Item(1));
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let q = BoundedQueue::new(4);
        assert!(q.push(1));
        assert!(q.push(2));
        q.close();
        assert!(!q.push(3));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Item(1));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Item(2));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Closed);
    }

    #[test]
    fn stop_unblocks_blocked_producer() {
        let q = Arc::new(BoundedQueue::new(1));
        assert!(q.push(0));
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.push(1))
        };
        std::thread::sleep(Duration::from_millis(20));
        q.stop();
        assert!(!producer.join().unwrap());
        assert_eq!(
            q.pop_timeout(Duration::from_millis(1)),
            PopResult::<i32>::Stopped
        );
    }

    #[test]
    fn reset_reopens_after_close() {
        let q = BoundedQueue::new(2);
        q.close();
        assert_eq!(
            q.pop_timeout(Duration::from_millis(1)),
            PopResult::<i32>::Closed
        );
        q.reset();
        assert!(q.push(5));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), PopResult::Item(5));
    }
}
