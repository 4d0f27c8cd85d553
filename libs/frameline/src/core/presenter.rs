// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Presentation stages: wall-clock pacing, drop accounting, A/V sync.
//!
//! The video presenter anchors on its first frame (wall-clock time and pts
//! captured together), then paces every later frame against
//! `diff = (pts - first_pts) - elapsed`:
//!
//! - early by more than [`WAIT_THRESHOLD`]: sleep `diff` before presenting
//!   (skipped in low-latency mode);
//! - late by more than [`DROP_THRESHOLD`]: count the frame dropped and do
//!   not present it — the anchor frame and the one immediately after are
//!   exempt;
//! - every 100 frames, recompute smoothed FPS from the wall clock.
//!
//! Thresholds are compile-time constants; the policy is deliberately not
//! adaptive.

use super::error::Result;
use super::frame::Frame;
use super::latency::LatencyMonitor;
use super::media_clock::{MediaClock, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
use super::stage::{Drain, Poll, Stage, Submit};
use super::sync::{AvSyncClock, DEFAULT_SYNC_TOLERANCE_TICKS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Delays below this are absorbed instead of slept away (5 ms).
pub const WAIT_THRESHOLD: i64 = 5 * TICKS_PER_MILLISECOND;

/// Lags beyond this get the frame dropped (10 ms).
pub const DROP_THRESHOLD: i64 = 10 * TICKS_PER_MILLISECOND;

const FPS_CHECKPOINT_FRAMES: u64 = 100;

/// Playback mode of a presentation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterMode {
    Playing,
    Paused,
    /// Present exactly one frame, then fall back to `Paused`.
    Step,
}

/// Shared transport control for a presentation stage.
///
/// The pipeline (or the embedding application) holds this handle and flips
/// it from its own thread; the presenter reads it on every submit.
#[derive(Debug)]
pub struct PresenterControl {
    mode: Mutex<PresenterMode>,
    frozen: AtomicBool,
    do_wait: AtomicBool,
    reanchor: AtomicBool,
}

impl PresenterControl {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(PresenterMode::Playing),
            frozen: AtomicBool::new(false),
            do_wait: AtomicBool::new(true),
            reanchor: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> PresenterMode {
        *self.mode.lock()
    }

    pub fn pause(&self) {
        *self.mode.lock() = PresenterMode::Paused;
    }

    /// Resume playback; the pacing anchor is re-established on the next
    /// frame so the pause gap is not counted as lateness.
    pub fn resume(&self) {
        *self.mode.lock() = PresenterMode::Playing;
        self.reanchor.store(true, Ordering::Release);
    }

    pub fn step(&self) {
        *self.mode.lock() = PresenterMode::Step;
    }

    /// Suspend presentation entirely (seek in progress): frames are
    /// consumed and discarded without pacing or counting.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn unfreeze(&self) {
        self.frozen.store(false, Ordering::Release);
        self.reanchor.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Disable the early-frame wait ("low-latency" mode).
    pub fn set_do_wait(&self, do_wait: bool) {
        self.do_wait.store(do_wait, Ordering::Release);
    }

    pub fn do_wait(&self) -> bool {
        self.do_wait.load(Ordering::Acquire)
    }

    fn take_reanchor(&self) -> bool {
        self.reanchor.swap(false, Ordering::AcqRel)
    }
}

impl Default for PresenterControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters published by a presentation stage.
#[derive(Debug, Default)]
pub struct PresenterStats {
    presented: AtomicU64,
    dropped: AtomicU64,
    fps: Mutex<f64>,
}

impl PresenterStats {
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Smoothed FPS from the last 100-frame checkpoint.
    pub fn fps(&self) -> f64 {
        *self.fps.lock()
    }
}

/// Downstream presentation surface.
pub trait PresentTarget: Send {
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// Discards frames; pacing and accounting still apply.
pub struct NullPresentTarget;

impl PresentTarget for NullPresentTarget {
    fn present(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Records presented pts values, for tests and dry runs.
pub struct CollectPresentTarget {
    presented: Arc<Mutex<Vec<i64>>>,
}

impl CollectPresentTarget {
    pub fn new() -> Self {
        Self {
            presented: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn presented(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.presented)
    }
}

impl Default for CollectPresentTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentTarget for CollectPresentTarget {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.presented.lock().push(frame.pts());
        Ok(())
    }
}

/// Registered with the pipeline so transport commands and stats queries
/// reach every presentation stage.
pub trait PresentationStage {
    fn control(&self) -> Arc<PresenterControl>;
    fn stats(&self) -> Arc<PresenterStats>;
}

/// Video presentation sink with the fixed-threshold pacing policy.
pub struct VideoPresenter {
    name: String,
    clock: Arc<dyn MediaClock>,
    target: Box<dyn PresentTarget>,
    avsync: Option<Arc<AvSyncClock>>,
    monitor: Option<Arc<LatencyMonitor>>,
    control: Arc<PresenterControl>,
    stats: Arc<PresenterStats>,
    start_time: Option<i64>,
    start_pts: Option<i64>,
    fps_stat_start: i64,
    frame_count: u64,
    drained: bool,
}

impl VideoPresenter {
    pub fn new(
        name: impl Into<String>,
        clock: Arc<dyn MediaClock>,
        target: Box<dyn PresentTarget>,
    ) -> Self {
        Self {
            name: name.into(),
            clock,
            target,
            avsync: None,
            monitor: None,
            control: Arc::new(PresenterControl::new()),
            stats: Arc::new(PresenterStats::default()),
            start_time: None,
            start_pts: None,
            fps_stat_start: 0,
            frame_count: 0,
            drained: false,
        }
    }

    pub fn with_avsync(mut self, avsync: Arc<AvSyncClock>) -> Self {
        self.avsync = Some(avsync);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<LatencyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Pace one frame against the anchor. Returns whether to present it.
    fn wait_for_pts(&mut self, pts: i64) -> bool {
        let mut present = true;
        let now = self.clock.now();

        match (self.start_time, self.start_pts) {
            (Some(start_time), Some(start_pts)) => {
                let elapsed = now - start_time;
                let rel_pts = pts - start_pts;
                let diff = rel_pts - elapsed;

                if diff > WAIT_THRESHOLD && self.control.do_wait() {
                    self.clock.sleep(diff);
                }
                if diff < -DROP_THRESHOLD {
                    // The frame right after the anchor absorbs startup
                    // jitter and is never dropped.
                    if self.frame_count != 1 {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(
                            stage = %self.name,
                            pts,
                            late_ms = -diff / TICKS_PER_MILLISECOND,
                            "dropping late frame"
                        );
                        present = false;
                    }
                }

                if self.frame_count % FPS_CHECKPOINT_FRAMES == 0 {
                    let present_time = self.clock.now() - start_time;
                    let window = present_time - self.fps_stat_start;
                    if window > 0 {
                        let fps = TICKS_PER_SECOND as f64
                            / (window as f64 / FPS_CHECKPOINT_FRAMES as f64);
                        *self.stats.fps.lock() = fps;
                    }
                    self.fps_stat_start = present_time;
                }
            }
            _ => {
                self.start_time = Some(now);
                self.start_pts = Some(pts);
                self.fps_stat_start = 0;
            }
        }
        self.frame_count += 1;
        present
    }

    fn reset_pacing(&mut self) {
        self.start_time = None;
        self.start_pts = None;
        self.fps_stat_start = 0;
        self.frame_count = 0;
    }
}

impl PresentationStage for VideoPresenter {
    fn control(&self) -> Arc<PresenterControl> {
        Arc::clone(&self.control)
    }

    fn stats(&self) -> Arc<PresenterStats> {
        Arc::clone(&self.stats)
    }
}

impl Stage for VideoPresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        if self.control.is_frozen() {
            return Ok(Submit::Accepted);
        }
        if self.control.take_reanchor() {
            self.start_time = None;
            self.start_pts = None;
        }

        if let Some(avsync) = &self.avsync {
            if !avsync.is_video_started() {
                avsync.mark_video_started();
            }
            avsync.set_video_pts(frame.pts());
        }

        match self.control.mode() {
            // A paused presenter pushes back; upstream buffering is then
            // bounded by connector queue capacity.
            PresenterMode::Paused => return Ok(Submit::Full(frame)),
            PresenterMode::Step => self.control.pause(),
            PresenterMode::Playing => {}
        }

        if self.wait_for_pts(frame.pts()) {
            self.target.present(&frame)?;
            if let Some(monitor) = &self.monitor {
                monitor.record_output(&frame);
            }
            self.stats.presented.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.drained {
            Ok(Poll::Eof)
        } else {
            Ok(Poll::Pending)
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.drained = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        self.reset_pacing();
        self.drained = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.reset_pacing();
    }
}

/// Audio presentation sink.
///
/// Audio blocks are contiguous, so nothing is ever dropped; instead the
/// wait is biased by the published video/audio drift to keep the two
/// streams aligned.
pub struct AudioPresenter {
    name: String,
    clock: Arc<dyn MediaClock>,
    target: Box<dyn PresentTarget>,
    avsync: Option<Arc<AvSyncClock>>,
    control: Arc<PresenterControl>,
    stats: Arc<PresenterStats>,
    start_time: Option<i64>,
    start_pts: Option<i64>,
    drained: bool,
}

impl AudioPresenter {
    pub fn new(
        name: impl Into<String>,
        clock: Arc<dyn MediaClock>,
        target: Box<dyn PresentTarget>,
    ) -> Self {
        Self {
            name: name.into(),
            clock,
            target,
            avsync: None,
            control: Arc::new(PresenterControl::new()),
            stats: Arc::new(PresenterStats::default()),
            start_time: None,
            start_pts: None,
            drained: false,
        }
    }

    pub fn with_avsync(mut self, avsync: Arc<AvSyncClock>) -> Self {
        self.avsync = Some(avsync);
        self
    }
}

impl PresentationStage for AudioPresenter {
    fn control(&self) -> Arc<PresenterControl> {
        Arc::clone(&self.control)
    }

    fn stats(&self) -> Arc<PresenterStats> {
        Arc::clone(&self.stats)
    }
}

impl Stage for AudioPresenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        if self.control.is_frozen() {
            return Ok(Submit::Accepted);
        }
        if self.control.take_reanchor() {
            self.start_time = None;
            self.start_pts = None;
        }
        if matches!(self.control.mode(), PresenterMode::Paused) {
            return Ok(Submit::Full(frame));
        }

        if let Some(avsync) = &self.avsync {
            if !avsync.is_audio_started() {
                avsync.mark_audio_started();
            }
            avsync.set_audio_pts(frame.pts());
        }

        let now = self.clock.now();
        match (self.start_time, self.start_pts) {
            (Some(start_time), Some(start_pts)) => {
                let mut diff = (frame.pts() - start_pts) - (now - start_time);
                if let Some(avsync) = &self.avsync {
                    if let Some(drift) = avsync.drift() {
                        // drift > 0: video runs ahead, shorten the audio
                        // wait; drift < 0: audio runs ahead, extend it.
                        if drift.abs() > DEFAULT_SYNC_TOLERANCE_TICKS {
                            diff -= drift;
                        }
                    }
                }
                if diff > WAIT_THRESHOLD && self.control.do_wait() {
                    self.clock.sleep(diff);
                }
            }
            _ => {
                self.start_time = Some(now);
                self.start_pts = Some(frame.pts());
            }
        }

        self.target.present(&frame)?;
        self.stats.presented.fetch_add(1, Ordering::Relaxed);
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.drained {
            Ok(Poll::Eof)
        } else {
            Ok(Poll::Pending)
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.drained = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        self.start_time = None;
        self.start_pts = None;
        self.drained = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.start_time = None;
        self.start_pts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::{PixelFormat, VideoData};
    use crate::core::media_clock::{ManualClock, millis_to_ticks};

    fn frame(pts_ms: i64) -> Frame {
        Frame::video(
            VideoData {
                data: Arc::new(vec![0; 4]),
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
            },
            millis_to_ticks(pts_ms),
        )
    }

    fn presenter(clock: Arc<ManualClock>) -> (VideoPresenter, Arc<Mutex<Vec<i64>>>) {
        let target = CollectPresentTarget::new();
        let presented = target.presented();
        (
            VideoPresenter::new("video", clock, Box::new(target)),
            presented,
        )
    }

    #[test]
    fn early_frame_waits_at_least_diff() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock.clone());

        // Anchor.
        assert!(matches!(p.submit(frame(0)).unwrap(), Submit::Accepted));
        // Next frame is 33 ms early relative to the anchor: the presenter
        // must sleep the difference (ManualClock::sleep advances time).
        assert!(matches!(p.submit(frame(33)).unwrap(), Submit::Accepted));
        assert!(clock.now() >= millis_to_ticks(33) - WAIT_THRESHOLD);
        assert_eq!(presented.lock().len(), 2);
        assert_eq!(p.stats.dropped(), 0);
    }

    #[test]
    fn late_frame_dropped_and_counted() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock.clone());

        p.submit(frame(0)).unwrap(); // anchor (frame 0)
        p.submit(frame(33)).unwrap(); // frame 1: protected even if late
        // Frame 2 arrives 50 ms after its pts.
        clock.set(millis_to_ticks(66 + 50));
        p.submit(frame(66)).unwrap();

        assert_eq!(p.stats.dropped(), 1);
        assert_eq!(presented.lock().len(), 2);
        assert_eq!(*presented.lock(), vec![0, millis_to_ticks(33)]);
    }

    #[test]
    fn frame_after_anchor_is_never_dropped() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock.clone());

        p.submit(frame(0)).unwrap();
        // Frame 1 is hopelessly late but still presented.
        clock.set(millis_to_ticks(500));
        p.submit(frame(33)).unwrap();
        assert_eq!(p.stats.dropped(), 0);
        assert_eq!(presented.lock().len(), 2);
    }

    #[test]
    fn small_lag_is_not_dropped() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, _) = presenter(clock.clone());

        p.submit(frame(0)).unwrap();
        p.submit(frame(33)).unwrap();
        // 8 ms late: inside the 10 ms drop threshold.
        clock.set(millis_to_ticks(66 + 8));
        p.submit(frame(66)).unwrap();
        assert_eq!(p.stats.dropped(), 0);
    }

    #[test]
    fn low_latency_mode_skips_the_wait() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock.clone());
        p.control.set_do_wait(false);

        p.submit(frame(0)).unwrap();
        p.submit(frame(100)).unwrap();
        // Without the wait the clock never advanced.
        assert_eq!(clock.now(), 0);
        assert_eq!(presented.lock().len(), 2);
    }

    #[test]
    fn paused_presenter_pushes_back() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock);

        p.control.pause();
        let Submit::Full(returned) = p.submit(frame(0)).unwrap() else {
            panic!("paused presenter must report Full");
        };
        assert_eq!(returned.pts(), 0);
        assert!(presented.lock().is_empty());

        p.control.resume();
        assert!(matches!(p.submit(returned).unwrap(), Submit::Accepted));
        assert_eq!(presented.lock().len(), 1);
    }

    #[test]
    fn step_presents_one_frame_then_pauses() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock);

        p.control.pause();
        p.control.step();
        assert!(matches!(p.submit(frame(0)).unwrap(), Submit::Accepted));
        assert_eq!(presented.lock().len(), 1);
        assert!(matches!(p.submit(frame(33)).unwrap(), Submit::Full(_)));
    }

    #[test]
    fn frozen_presenter_swallows_frames() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock);

        p.control.freeze();
        assert!(matches!(p.submit(frame(0)).unwrap(), Submit::Accepted));
        assert!(presented.lock().is_empty());
        assert_eq!(p.stats.presented(), 0);

        // Unfreeze re-anchors: the next frame is the new time zero.
        p.control.unfreeze();
        assert!(matches!(p.submit(frame(900)).unwrap(), Submit::Accepted));
        assert_eq!(presented.lock().len(), 1);
        assert_eq!(p.stats.dropped(), 0);
    }

    #[test]
    fn reinit_reanchors_for_loop_restart() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut p, presented) = presenter(clock.clone());

        p.submit(frame(0)).unwrap();
        p.submit(frame(33)).unwrap();
        p.drain().unwrap();
        assert!(matches!(p.try_receive().unwrap(), Poll::Eof));

        p.reinit().unwrap();
        assert!(matches!(p.try_receive().unwrap(), Poll::Pending));
        // Wall clock has moved on, but pts restart at zero: without a
        // fresh anchor this frame would be dropped as hopelessly late.
        clock.advance(millis_to_ticks(5_000));
        p.submit(frame(0)).unwrap();
        assert_eq!(p.stats.dropped(), 0);
        assert_eq!(presented.lock().len(), 3);
    }

    #[test]
    fn publishes_pts_to_avsync() {
        let clock = Arc::new(ManualClock::new(0));
        let avsync = Arc::new(AvSyncClock::new());
        let mut p = VideoPresenter::new("video", clock, Box::new(NullPresentTarget))
            .with_avsync(Arc::clone(&avsync));

        assert!(!avsync.is_video_started());
        p.submit(frame(0)).unwrap();
        assert!(avsync.is_video_started());
        assert_eq!(avsync.video_pts(), Some(0));
        p.submit(frame(33)).unwrap();
        assert_eq!(avsync.video_pts(), Some(millis_to_ticks(33)));
    }

    #[test]
    fn audio_presenter_biases_wait_by_drift() {
        let clock = Arc::new(ManualClock::new(0));
        let avsync = Arc::new(AvSyncClock::new());
        avsync.mark_video_started();
        avsync.set_video_pts(millis_to_ticks(100));

        let mut p = AudioPresenter::new("audio", clock.clone(), Box::new(NullPresentTarget))
            .with_avsync(Arc::clone(&avsync));

        p.submit(frame(0)).unwrap(); // anchor
        // Audio pts 40 ms, video already at 100 ms: audio is far behind,
        // so no wait should happen even though the block is "early".
        p.submit(frame(40)).unwrap();
        assert_eq!(clock.now(), 0, "audio behind video must not sleep");
        assert_eq!(p.stats.presented(), 2);
    }
}
