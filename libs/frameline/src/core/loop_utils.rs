// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Bounded retry-with-backoff for busy-poll loops.
//!
//! Transient stage statuses (`Full`, `Pending`) are retried by the caller
//! with millisecond sleeps. Instead of scattering ad hoc sleep loops, every
//! retry site goes through [`RetryBackoff`], which composes an interval, an
//! optional deadline, and a stop flag so cancellation and timeouts stay
//! uniform across the pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Retry interval for saturated/not-ready statuses. Hardware-style queues
/// turn around in well under a millisecond, so a 1 ms poll is enough.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on retrying a `Full` drain signal before the pipeline
/// reports a fatal drain timeout.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Slept one interval; retry the operation.
    Retry,
    /// The deadline passed before the operation succeeded.
    TimedOut,
    /// The stop flag was raised; abandon the operation.
    Stopped,
}

/// Sleep/retry policy for one logical operation.
pub struct RetryBackoff {
    interval: Duration,
    deadline: Option<Instant>,
    stop: Option<Arc<AtomicBool>>,
}

impl RetryBackoff {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            interval,
            deadline: timeout.map(|t| Instant::now() + t),
            stop: None,
        }
    }

    /// Attach a stop flag checked before every sleep.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Block for one interval, honoring stop and deadline.
    pub fn wait(&mut self) -> Wait {
        if let Some(stop) = &self.stop {
            if stop.load(Ordering::Acquire) {
                return Wait::Stopped;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Wait::TimedOut;
            }
        }
        std::thread::sleep(self.interval);
        Wait::Retry
    }
}
