// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Media clock abstraction for pacing and latency measurement.
//!
//! All timestamps in the pipeline are expressed in clock ticks of 100 ns
//! (`TICKS_PER_SECOND` = 10,000,000). The presenter and latency monitor
//! read time through the `MediaClock` trait so tests can substitute a
//! manually-advanced clock.

use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Clock ticks per second (one tick = 100 ns).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = TICKS_PER_SECOND / 1_000;

/// Convert a tick count to a `Duration`. Negative values clamp to zero.
#[inline]
pub fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::from_nanos(ticks.max(0) as u64 * 100)
}

/// Convert a `Duration` to clock ticks (saturating).
#[inline]
pub fn duration_to_ticks(d: Duration) -> i64 {
    (d.as_nanos() / 100).min(i64::MAX as u128) as i64
}

/// Convert milliseconds to clock ticks.
#[inline]
pub fn millis_to_ticks(ms: i64) -> i64 {
    ms * TICKS_PER_MILLISECOND
}

/// Convert clock ticks to fractional milliseconds.
#[inline]
pub fn ticks_to_millis(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_MILLISECOND as f64
}

/// Abstract monotonic clock.
///
/// Implementations must be cheap to query; the presenter reads the clock
/// once per frame and the latency monitor once per submit/output pair.
pub trait MediaClock: Send + Sync {
    /// Current time in clock ticks since an arbitrary fixed epoch.
    fn now(&self) -> i64;

    /// Block the calling thread for `ticks` (no-op when `ticks <= 0`).
    fn sleep(&self, ticks: i64);
}

/// Process-wide monotonic clock backed by `Instant`.
///
/// The epoch is captured on first use so tick values stay small and
/// differences are meaningful across all clock instances in the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl MediaClock for MonotonicClock {
    #[inline]
    fn now(&self) -> i64 {
        duration_to_ticks(process_epoch().elapsed())
    }

    fn sleep(&self, ticks: i64) {
        if ticks > 0 {
            std::thread::sleep(ticks_to_duration(ticks));
        }
    }
}

/// Manually-advanced clock for deterministic tests.
///
/// `sleep` advances the clock instead of blocking, so pacing decisions can
/// be asserted without wall-clock delays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<i64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `ticks`.
    pub fn advance(&self, ticks: i64) {
        *self.now.lock() += ticks;
    }

    /// Set the clock to an absolute tick value.
    pub fn set(&self, ticks: i64) {
        *self.now.lock() = ticks;
    }
}

impl MediaClock for ManualClock {
    fn now(&self) -> i64 {
        *self.now.lock()
    }

    fn sleep(&self, ticks: i64) {
        if ticks > 0 {
            *self.now.lock() += ticks;
        }
    }
}
