// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Submission-to-output latency measurement.
//!
//! The monitor stamps the submission time into a custom frame property on
//! the way in; well-behaved units copy custom properties from input to
//! output, so the terminal stage can read the stamp back and compute how
//! long the frame spent inside the pipeline. The first frame's latency is
//! reported separately — it includes one-time warmup and would skew
//! min/max.

use super::frame::Frame;
use super::media_clock::{MediaClock, ticks_to_millis};
use parking_lot::Mutex;
use std::sync::Arc;

/// Property key carrying the submission timestamp through the pipeline.
pub const SUBMIT_TIME_PROPERTY: &str = "frameline.submit-time";

#[derive(Debug, Default, Clone)]
struct Stats {
    frames: u64,
    first_frame: Option<i64>,
    min: i64,
    max: i64,
    total: i64,
    started_at: Option<i64>,
    last_output_at: i64,
}

/// Aggregated latency/throughput figures.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyReport {
    /// Frames that completed the submit→output round trip.
    pub frames: u64,
    /// Latency of the first frame (pipeline warmup included), ms.
    pub first_frame_ms: f64,
    /// Minimum latency excluding the first frame, ms.
    pub min_ms: f64,
    /// Maximum latency excluding the first frame, ms.
    pub max_ms: f64,
    /// Mean latency over all frames, ms.
    pub avg_ms: f64,
    /// Wall-clock span from first submit to last output, ms.
    pub elapsed_ms: f64,
    /// Frames per second over the measured span.
    pub throughput_fps: f64,
}

/// Records per-frame submit/output times and aggregates them.
pub struct LatencyMonitor {
    clock: Arc<dyn MediaClock>,
    stats: Mutex<Stats>,
}

impl LatencyMonitor {
    pub fn new(clock: Arc<dyn MediaClock>) -> Self {
        Self {
            clock,
            stats: Mutex::new(Stats::default()),
        }
    }

    /// Stamp the submission time onto a frame about to enter the pipeline.
    pub fn record_submit(&self, frame: &mut Frame) {
        let now = self.clock.now();
        frame.set_property(SUBMIT_TIME_PROPERTY, now);
        let mut stats = self.stats.lock();
        if stats.started_at.is_none() {
            stats.started_at = Some(now);
        }
    }

    /// Record a frame arriving at the terminal stage. Frames without a
    /// submission stamp (not fed through `record_submit`) are ignored.
    pub fn record_output(&self, frame: &Frame) {
        let Some(submitted) = frame.property_int(SUBMIT_TIME_PROPERTY) else {
            return;
        };
        let now = self.clock.now();
        let latency = now - submitted;

        let mut stats = self.stats.lock();
        stats.frames += 1;
        stats.total += latency;
        stats.last_output_at = now;
        if stats.first_frame.is_none() {
            stats.first_frame = Some(latency);
        } else {
            stats.min = if stats.frames == 2 {
                latency
            } else {
                stats.min.min(latency)
            };
            stats.max = stats.max.max(latency);
        }
    }

    pub fn frames(&self) -> u64 {
        self.stats.lock().frames
    }

    /// Clear all recorded figures (loop restart, seek).
    pub fn reset(&self) {
        *self.stats.lock() = Stats::default();
    }

    pub fn report(&self) -> LatencyReport {
        let stats = self.stats.lock().clone();
        let elapsed = match stats.started_at {
            Some(start) if stats.frames > 0 => stats.last_output_at - start,
            _ => 0,
        };
        let avg = if stats.frames > 0 {
            stats.total as f64 / stats.frames as f64
        } else {
            0.0
        };
        let throughput = if elapsed > 0 {
            stats.frames as f64 * super::media_clock::TICKS_PER_SECOND as f64 / elapsed as f64
        } else {
            0.0
        };
        LatencyReport {
            frames: stats.frames,
            first_frame_ms: ticks_to_millis(stats.first_frame.unwrap_or(0)),
            min_ms: ticks_to_millis(if stats.frames > 1 { stats.min } else { 0 }),
            max_ms: ticks_to_millis(if stats.frames > 1 { stats.max } else { 0 }),
            avg_ms: if stats.frames > 0 {
                avg / super::media_clock::TICKS_PER_MILLISECOND as f64
            } else {
                0.0
            },
            elapsed_ms: ticks_to_millis(elapsed),
            throughput_fps: throughput,
        }
    }
}
