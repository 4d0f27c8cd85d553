// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fan-out and fan-in stages.
//!
//! - [`Splitter`]: duplicates every input frame to N output slots (payload
//!   buffers are Arc-shared, so no pixel copies).
//! - [`Combiner`]: merges N input slots back into one pts-ordered stream.
//! - [`StreamRouter`]: demuxer-style routing of a mixed stream to a video
//!   slot and an audio slot by media kind.

use super::error::{PipelineError, Result};
use super::frame::{Frame, MediaKind};
use super::stage::{Drain, Poll, Stage, Submit};
use std::collections::VecDeque;

const DEFAULT_BRANCH_DEPTH: usize = 4;

/// One input, `n` duplicated outputs.
pub struct Splitter {
    name: String,
    outputs: Vec<VecDeque<Frame>>,
    depth: usize,
    draining: bool,
}

impl Splitter {
    pub fn new(name: impl Into<String>, outputs: usize) -> Result<Self> {
        if outputs < 2 {
            return Err(PipelineError::Configuration(format!(
                "splitter needs at least 2 outputs, got {outputs}"
            )));
        }
        Ok(Self {
            name: name.into(),
            outputs: (0..outputs).map(|_| VecDeque::new()).collect(),
            depth: DEFAULT_BRANCH_DEPTH,
            draining: false,
        })
    }
}

impl Stage for Splitter {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        if self.outputs.iter().any(|q| q.len() >= self.depth) {
            // The slowest branch throttles the whole split.
            return Ok(Submit::Full(frame));
        }
        let (last, rest) = self.outputs.split_last_mut().expect("at least 2 outputs");
        for queue in rest {
            queue.push_back(frame.clone());
        }
        last.push_back(frame);
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        self.try_receive_from(0)
    }

    fn try_receive_from(&mut self, slot: usize) -> Result<Poll> {
        let queue = self
            .outputs
            .get_mut(slot)
            .ok_or_else(|| {
                PipelineError::stage(self.name.as_str(), format!("no output slot {slot}"))
            })?;
        match queue.pop_front() {
            Some(frame) => Ok(Poll::Frame(frame)),
            None if self.draining => Ok(Poll::Eof),
            None => Ok(Poll::Pending),
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.draining = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        for queue in &mut self.outputs {
            queue.clear();
        }
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        for queue in &mut self.outputs {
            queue.clear();
        }
    }

    fn output_slots(&self) -> usize {
        self.outputs.len()
    }
}

/// `n` inputs merged into one pts-ordered output.
///
/// A frame is released once every still-active input has one buffered, so
/// slow branches gate the merge rather than being starved out of order.
pub struct Combiner {
    name: String,
    inputs: Vec<VecDeque<Frame>>,
    eof_inputs: Vec<bool>,
    depth: usize,
    draining: bool,
}

impl Combiner {
    pub fn new(name: impl Into<String>, inputs: usize) -> Result<Self> {
        if inputs < 2 {
            return Err(PipelineError::Configuration(format!(
                "combiner needs at least 2 inputs, got {inputs}"
            )));
        }
        Ok(Self {
            name: name.into(),
            inputs: (0..inputs).map(|_| VecDeque::new()).collect(),
            eof_inputs: vec![false; inputs],
            depth: DEFAULT_BRANCH_DEPTH,
            draining: false,
        })
    }

    fn pop_min_pts(&mut self) -> Option<Frame> {
        let slot = self
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(i, q)| q.front().map(|f| (i, f.pts())))
            .min_by_key(|(_, pts)| *pts)
            .map(|(i, _)| i)?;
        self.inputs[slot].pop_front()
    }

    /// True once no further input can arrive on any slot.
    fn fully_drained(&self) -> bool {
        self.draining || self.eof_inputs.iter().all(|eof| *eof)
    }

    /// Inputs that have not reported end-of-stream all hold a frame, so a
    /// global-min pop cannot emit out of order.
    fn active_inputs_ready(&self) -> bool {
        self.inputs
            .iter()
            .zip(&self.eof_inputs)
            .all(|(queue, eof)| *eof || !queue.is_empty())
    }
}

impl Stage for Combiner {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        self.submit_to(0, frame)
    }

    fn submit_to(&mut self, slot: usize, frame: Frame) -> Result<Submit> {
        let Some(queue) = self.inputs.get_mut(slot) else {
            return Err(PipelineError::stage(
                self.name.as_str(),
                format!("no input slot {slot}"),
            ));
        };
        if queue.len() >= self.depth {
            return Ok(Submit::Full(frame));
        }
        queue.push_back(frame);
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.fully_drained() {
            return match self.pop_min_pts() {
                Some(frame) => Ok(Poll::Frame(frame)),
                None => Ok(Poll::Eof),
            };
        }
        // Only merge while every still-active input can participate.
        if self.active_inputs_ready() {
            match self.pop_min_pts() {
                Some(frame) => Ok(Poll::Frame(frame)),
                None => Ok(Poll::Pending),
            }
        } else {
            Ok(Poll::Pending)
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.draining = true;
        Ok(Drain::Accepted)
    }

    fn drain_slot(&mut self, slot: usize) -> Result<Drain> {
        match self.eof_inputs.get_mut(slot) {
            Some(eof) => {
                *eof = true;
                Ok(Drain::Accepted)
            }
            None => Err(PipelineError::stage(
                self.name.as_str(),
                format!("no input slot {slot}"),
            )),
        }
    }

    fn reinit(&mut self) -> Result<()> {
        for queue in &mut self.inputs {
            queue.clear();
        }
        self.eof_inputs.fill(false);
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        for queue in &mut self.inputs {
            queue.clear();
        }
    }

    fn input_slots(&self) -> usize {
        self.inputs.len()
    }
}

/// Routes a mixed A/V stream: slot 0 carries video, slot 1 carries audio.
pub struct StreamRouter {
    name: String,
    video: VecDeque<Frame>,
    audio: VecDeque<Frame>,
    depth: usize,
    draining: bool,
}

impl StreamRouter {
    pub const VIDEO_SLOT: usize = 0;
    pub const AUDIO_SLOT: usize = 1;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            video: VecDeque::new(),
            audio: VecDeque::new(),
            depth: DEFAULT_BRANCH_DEPTH * 2,
            draining: false,
        }
    }
}

impl Stage for StreamRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        let queue = match frame.kind() {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };
        if queue.len() >= self.depth {
            return Ok(Submit::Full(frame));
        }
        queue.push_back(frame);
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        self.try_receive_from(Self::VIDEO_SLOT)
    }

    fn try_receive_from(&mut self, slot: usize) -> Result<Poll> {
        let queue = match slot {
            Self::VIDEO_SLOT => &mut self.video,
            Self::AUDIO_SLOT => &mut self.audio,
            _ => {
                return Err(PipelineError::stage(
                    self.name.as_str(),
                    format!("no output slot {slot}"),
                ));
            }
        };
        match queue.pop_front() {
            Some(frame) => Ok(Poll::Frame(frame)),
            None if self.draining => Ok(Poll::Eof),
            None => Ok(Poll::Pending),
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.draining = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        self.video.clear();
        self.audio.clear();
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.video.clear();
        self.audio.clear();
    }

    fn output_slots(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::{AudioData, PixelFormat, VideoData};
    use std::sync::Arc;

    fn video_frame(pts: i64) -> Frame {
        Frame::video(
            VideoData {
                data: Arc::new(vec![0; 4]),
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
            },
            pts,
        )
    }

    fn audio_frame(pts: i64) -> Frame {
        Frame::audio(
            AudioData {
                samples: Arc::new(vec![0.0; 8]),
                sample_rate: 48_000,
                channels: 2,
            },
            pts,
        )
    }

    #[test]
    fn splitter_duplicates_to_all_branches() {
        let mut splitter = Splitter::new("split", 2).unwrap();
        splitter.submit(video_frame(10)).unwrap();

        let Poll::Frame(a) = splitter.try_receive_from(0).unwrap() else {
            panic!()
        };
        let Poll::Frame(b) = splitter.try_receive_from(1).unwrap() else {
            panic!()
        };
        assert_eq!(a.pts(), 10);
        assert_eq!(b.pts(), 10);
        assert!(matches!(
            splitter.try_receive_from(0).unwrap(),
            Poll::Pending
        ));
    }

    #[test]
    fn splitter_throttled_by_slowest_branch() {
        let mut splitter = Splitter::new("split", 2).unwrap();
        for pts in 0..DEFAULT_BRANCH_DEPTH as i64 {
            assert!(matches!(
                splitter.submit(video_frame(pts)).unwrap(),
                Submit::Accepted
            ));
        }
        // Branch 0 drains, branch 1 does not: still Full.
        let _ = splitter.try_receive_from(0).unwrap();
        assert!(matches!(
            splitter.submit(video_frame(99)).unwrap(),
            Submit::Full(_)
        ));
    }

    #[test]
    fn splitter_eof_per_branch() {
        let mut splitter = Splitter::new("split", 2).unwrap();
        splitter.submit(video_frame(0)).unwrap();
        splitter.drain().unwrap();
        assert!(matches!(
            splitter.try_receive_from(0).unwrap(),
            Poll::Frame(_)
        ));
        assert!(matches!(splitter.try_receive_from(0).unwrap(), Poll::Eof));
        // Branch 1 still has its copy before reporting Eof.
        assert!(matches!(
            splitter.try_receive_from(1).unwrap(),
            Poll::Frame(_)
        ));
        assert!(matches!(splitter.try_receive_from(1).unwrap(), Poll::Eof));
    }

    #[test]
    fn combiner_merges_in_pts_order() {
        let mut combiner = Combiner::new("combine", 2).unwrap();
        combiner.submit_to(0, video_frame(0)).unwrap();
        combiner.submit_to(1, video_frame(16)).unwrap();
        combiner.submit_to(0, video_frame(33)).unwrap();

        let Poll::Frame(first) = combiner.try_receive().unwrap() else {
            panic!()
        };
        assert_eq!(first.pts(), 0);
        let Poll::Frame(second) = combiner.try_receive().unwrap() else {
            panic!()
        };
        assert_eq!(second.pts(), 16);
        // Slot 1 is now empty: hold the merge until it has data or drain.
        assert!(matches!(combiner.try_receive().unwrap(), Poll::Pending));
        combiner.drain().unwrap();
        let Poll::Frame(third) = combiner.try_receive().unwrap() else {
            panic!()
        };
        assert_eq!(third.pts(), 33);
        assert!(matches!(combiner.try_receive().unwrap(), Poll::Eof));
    }

    #[test]
    fn combiner_merges_on_after_one_branch_ends() {
        let mut combiner = Combiner::new("combine", 2).unwrap();
        combiner.submit_to(0, video_frame(0)).unwrap();
        combiner.submit_to(1, video_frame(8)).unwrap();
        combiner.submit_to(1, video_frame(16)).unwrap();

        // Branch 0 ends; the merge must not stall waiting for it.
        combiner.drain_slot(0).unwrap();
        let mut got = Vec::new();
        while let Poll::Frame(f) = combiner.try_receive().unwrap() {
            got.push(f.pts());
        }
        assert_eq!(got, vec![0, 8, 16]);
        // Branch 1 is still open: Pending, not Eof.
        assert!(matches!(combiner.try_receive().unwrap(), Poll::Pending));

        combiner.drain_slot(1).unwrap();
        assert!(matches!(combiner.try_receive().unwrap(), Poll::Eof));
    }

    #[test]
    fn combiner_backpressures_per_slot() {
        let mut combiner = Combiner::new("combine", 2).unwrap();
        for pts in 0..DEFAULT_BRANCH_DEPTH as i64 {
            assert!(matches!(
                combiner.submit_to(0, video_frame(pts)).unwrap(),
                Submit::Accepted
            ));
        }
        assert!(matches!(
            combiner.submit_to(0, video_frame(99)).unwrap(),
            Submit::Full(_)
        ));
        // The other slot is unaffected.
        assert!(matches!(
            combiner.submit_to(1, video_frame(0)).unwrap(),
            Submit::Accepted
        ));
    }

    #[test]
    fn router_separates_media_kinds() {
        let mut router = StreamRouter::new("demux");
        router.submit(video_frame(0)).unwrap();
        router.submit(audio_frame(5)).unwrap();
        router.submit(video_frame(33)).unwrap();

        let Poll::Frame(v) = router.try_receive_from(StreamRouter::VIDEO_SLOT).unwrap() else {
            panic!()
        };
        assert_eq!(v.pts(), 0);
        let Poll::Frame(a) = router.try_receive_from(StreamRouter::AUDIO_SLOT).unwrap() else {
            panic!()
        };
        assert_eq!(a.pts(), 5);
        let Poll::Frame(v2) = router.try_receive_from(StreamRouter::VIDEO_SLOT).unwrap() else {
            panic!()
        };
        assert_eq!(v2.pts(), 33);
        assert!(matches!(
            router.try_receive_from(StreamRouter::AUDIO_SLOT).unwrap(),
            Poll::Pending
        ));
    }
}
