// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! A/V sync clock shared by the video and audio presentation stages.
//!
//! Whichever stream presents its first frame becomes the timing anchor.
//! Each presenter publishes its own pts on every output frame; the other
//! presenter reads it to compute drift and adjust its wait. State lives
//! behind a single lock with short critical sections — no I/O under lock.

use super::media_clock::TICKS_PER_MILLISECOND;
use parking_lot::Mutex;

/// Drift at or below this bound (one 60 Hz frame interval) is considered
/// in sync.
pub const DEFAULT_SYNC_TOLERANCE_TICKS: i64 = (16.6 * TICKS_PER_MILLISECOND as f64) as i64;

#[derive(Debug, Default)]
struct State {
    video_started: bool,
    audio_started: bool,
    video_pts: Option<i64>,
    audio_pts: Option<i64>,
}

/// Shared reference clock for aligning independently-paced streams.
#[derive(Debug, Default)]
pub struct AvSyncClock {
    state: Mutex<State>,
}

impl AvSyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_video_started(&self) -> bool {
        self.state.lock().video_started
    }

    pub fn is_audio_started(&self) -> bool {
        self.state.lock().audio_started
    }

    pub fn mark_video_started(&self) {
        self.state.lock().video_started = true;
    }

    pub fn mark_audio_started(&self) {
        self.state.lock().audio_started = true;
    }

    pub fn set_video_pts(&self, pts: i64) {
        self.state.lock().video_pts = Some(pts);
    }

    pub fn set_audio_pts(&self, pts: i64) {
        self.state.lock().audio_pts = Some(pts);
    }

    pub fn video_pts(&self) -> Option<i64> {
        self.state.lock().video_pts
    }

    pub fn audio_pts(&self) -> Option<i64> {
        self.state.lock().audio_pts
    }

    /// Video pts minus audio pts, when both streams have published one.
    /// Positive drift means video runs ahead of audio.
    pub fn drift(&self) -> Option<i64> {
        let state = self.state.lock();
        match (state.video_pts, state.audio_pts) {
            (Some(v), Some(a)) => Some(v - a),
            _ => None,
        }
    }

    /// True when both streams are within `tolerance` ticks of each other.
    pub fn in_sync(&self, tolerance: i64) -> bool {
        match self.drift() {
            Some(d) => d.abs() <= tolerance,
            None => true,
        }
    }

    /// Clear all anchors and published timestamps (stop/seek).
    pub fn reset(&self) {
        *self.state.lock() = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media_clock::millis_to_ticks;

    #[test]
    fn first_stream_anchors() {
        let clock = AvSyncClock::new();
        assert!(!clock.is_video_started());
        assert!(!clock.is_audio_started());

        clock.mark_video_started();
        clock.set_video_pts(0);
        assert!(clock.is_video_started());
        assert!(!clock.is_audio_started());
    }

    #[test]
    fn drift_needs_both_streams() {
        let clock = AvSyncClock::new();
        clock.set_video_pts(millis_to_ticks(100));
        assert_eq!(clock.drift(), None);
        assert!(clock.in_sync(DEFAULT_SYNC_TOLERANCE_TICKS));

        clock.set_audio_pts(millis_to_ticks(80));
        assert_eq!(clock.drift(), Some(millis_to_ticks(20)));
        assert!(!clock.in_sync(DEFAULT_SYNC_TOLERANCE_TICKS));
        assert!(clock.in_sync(millis_to_ticks(25)));
    }

    #[test]
    fn reset_clears_everything() {
        let clock = AvSyncClock::new();
        clock.mark_video_started();
        clock.mark_audio_started();
        clock.set_video_pts(1);
        clock.set_audio_pts(2);

        clock.reset();
        assert!(!clock.is_video_started());
        assert!(!clock.is_audio_started());
        assert_eq!(clock.video_pts(), None);
        assert_eq!(clock.drift(), None);
    }
}
