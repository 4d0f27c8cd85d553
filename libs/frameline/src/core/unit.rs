// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Opaque processing units and the stage adapter that hosts them.
//!
//! A [`ProcessingUnit`] is the external collaborator doing the actual
//! media work (decode, convert, scale). The pipeline never sees inside it:
//! units are configured through a [`PropertyBag`], initialized with a
//! format and dimensions, then consumed strictly through
//! submit/try-receive/drain. [`UnitStage`] adapts a unit to the [`Stage`]
//! contract so connectors can drive it.
//!
//! The units shipped here are stand-ins: a passthrough and a fixed-delay
//! unit, enough to exercise every pipeline path without real hardware.

use super::config::PropertyBag;
use super::error::{PipelineError, Result};
use super::frame::{Frame, PixelFormat};
use super::stage::{Drain, Poll, Stage, Submit};
use std::collections::VecDeque;

/// External processing unit consumed through the submit/query/drain
/// contract.
pub trait ProcessingUnit: Send {
    /// Configure and allocate. Must be called before any submit.
    fn init(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        options: &PropertyBag,
    ) -> Result<()>;

    fn submit(&mut self, frame: Frame) -> Result<Submit>;

    fn try_receive(&mut self) -> Result<Poll>;

    fn drain(&mut self) -> Result<Drain>;

    /// Prepare for another pass over the input (loop restart).
    fn reinit(&mut self) -> Result<()>;

    /// Discard buffered frames (seek).
    fn flush(&mut self);

    /// Release backing resources.
    fn terminate(&mut self) {}
}

/// Stage adapter around a processing unit.
pub struct UnitStage {
    name: String,
    unit: Box<dyn ProcessingUnit>,
}

impl UnitStage {
    pub fn new(name: impl Into<String>, unit: Box<dyn ProcessingUnit>) -> Self {
        Self {
            name: name.into(),
            unit,
        }
    }

    /// Construct, configure and initialize in one go.
    pub fn init(
        name: impl Into<String>,
        mut unit: Box<dyn ProcessingUnit>,
        format: PixelFormat,
        width: u32,
        height: u32,
        options: &PropertyBag,
    ) -> Result<Self> {
        let name = name.into();
        unit.init(format, width, height, options)
            .map_err(|e| PipelineError::stage(name.as_str(), e.to_string()))?;
        Ok(Self { name, unit })
    }
}

impl Stage for UnitStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        self.unit.submit(frame)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        self.unit.try_receive()
    }

    fn drain(&mut self) -> Result<Drain> {
        self.unit.drain()
    }

    fn flush(&mut self) {
        self.unit.flush();
    }

    fn reinit(&mut self) -> Result<()> {
        self.unit.reinit()
    }

    fn terminate(&mut self) {
        self.unit.terminate();
    }
}

/// Forwarding unit with a bounded internal queue.
///
/// Mimics a hardware queue of configurable depth (`depth` option,
/// default 4): submit reports `Full` at capacity, and the drain signal
/// itself is refused while the queue is saturated.
pub struct PassthroughUnit {
    depth: usize,
    queue: VecDeque<Frame>,
    draining: bool,
    initialized: bool,
}

impl PassthroughUnit {
    pub const OPT_DEPTH: &'static str = "depth";

    pub fn new() -> Self {
        Self {
            depth: 4,
            queue: VecDeque::new(),
            draining: false,
            initialized: false,
        }
    }

    pub fn boxed() -> Box<dyn ProcessingUnit> {
        Box::new(Self::new())
    }
}

impl Default for PassthroughUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingUnit for PassthroughUnit {
    fn init(
        &mut self,
        _format: PixelFormat,
        width: u32,
        height: u32,
        options: &PropertyBag,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::Configuration(format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        if let Some(depth) = options.get_int(Self::OPT_DEPTH) {
            if depth < 1 {
                return Err(PipelineError::Configuration(format!(
                    "queue depth must be >= 1, got {depth}"
                )));
            }
            self.depth = depth as usize;
        }
        self.initialized = true;
        Ok(())
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        if !self.initialized {
            return Err(PipelineError::Configuration(
                "unit used before init".to_string(),
            ));
        }
        if self.draining {
            return Err(PipelineError::Configuration(
                "submit after drain".to_string(),
            ));
        }
        if self.queue.len() >= self.depth {
            return Ok(Submit::Full(frame));
        }
        self.queue.push_back(frame);
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        match self.queue.pop_front() {
            Some(frame) => Ok(Poll::Frame(frame)),
            None if self.draining => Ok(Poll::Eof),
            None => Ok(Poll::Pending),
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        if self.draining {
            return Ok(Drain::Accepted);
        }
        // A saturated queue blocks the drain signal itself; the caller
        // retries after pumping output.
        if self.queue.len() >= self.depth {
            return Ok(Drain::Full);
        }
        self.draining = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        self.queue.clear();
        self.draining = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.queue.clear();
    }
}

/// Passthrough that withholds each frame for a fixed number of polls,
/// simulating hardware turnaround latency.
pub struct LatencyUnit {
    inner: PassthroughUnit,
    delay_polls: u32,
    countdown: u32,
}

impl LatencyUnit {
    pub const OPT_DELAY_POLLS: &'static str = "delay-polls";

    pub fn new(delay_polls: u32) -> Self {
        Self {
            inner: PassthroughUnit::new(),
            delay_polls,
            countdown: delay_polls,
        }
    }

    pub fn boxed(delay_polls: u32) -> Box<dyn ProcessingUnit> {
        Box::new(Self::new(delay_polls))
    }
}

impl ProcessingUnit for LatencyUnit {
    fn init(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        options: &PropertyBag,
    ) -> Result<()> {
        if let Some(polls) = options.get_int(Self::OPT_DELAY_POLLS) {
            self.delay_polls = polls.max(0) as u32;
            self.countdown = self.delay_polls;
        }
        self.inner.init(format, width, height, options)
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        self.inner.submit(frame)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.inner.queue.is_empty() {
            return self.inner.try_receive();
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(Poll::Pending);
        }
        self.countdown = self.delay_polls;
        self.inner.try_receive()
    }

    fn drain(&mut self) -> Result<Drain> {
        self.inner.drain()
    }

    fn reinit(&mut self) -> Result<()> {
        self.countdown = self.delay_polls;
        self.inner.reinit()
    }

    fn flush(&mut self) {
        self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::VideoData;
    use std::sync::Arc;

    fn frame(pts: i64) -> Frame {
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

    fn init_passthrough(depth: i64) -> PassthroughUnit {
        let mut unit = PassthroughUnit::new();
        let options = PropertyBag::new().with(PassthroughUnit::OPT_DEPTH, depth);
        unit.init(PixelFormat::Nv12, 320, 240, &options).unwrap();
        unit
    }

    #[test]
    fn reports_full_at_depth() {
        let mut unit = init_passthrough(2);
        assert!(matches!(unit.submit(frame(0)).unwrap(), Submit::Accepted));
        assert!(matches!(unit.submit(frame(1)).unwrap(), Submit::Accepted));
        let Submit::Full(rejected) = unit.submit(frame(2)).unwrap() else {
            panic!("expected Full at depth");
        };
        assert_eq!(rejected.pts(), 2);
    }

    #[test]
    fn drain_refused_while_saturated() {
        let mut unit = init_passthrough(1);
        assert!(matches!(unit.submit(frame(0)).unwrap(), Submit::Accepted));
        assert_eq!(unit.drain().unwrap(), Drain::Full);

        // Pump one output, then the drain signal goes through.
        assert!(matches!(unit.try_receive().unwrap(), Poll::Frame(_)));
        assert_eq!(unit.drain().unwrap(), Drain::Accepted);
        assert!(matches!(unit.try_receive().unwrap(), Poll::Eof));

        // Idempotent once accepted.
        assert_eq!(unit.drain().unwrap(), Drain::Accepted);
        assert!(matches!(unit.try_receive().unwrap(), Poll::Eof));
    }

    #[test]
    fn frames_exit_in_submit_order() {
        let mut unit = init_passthrough(8);
        for pts in [0, 33, 66] {
            assert!(matches!(unit.submit(frame(pts)).unwrap(), Submit::Accepted));
        }
        for expected in [0, 33, 66] {
            let Poll::Frame(out) = unit.try_receive().unwrap() else {
                panic!("expected frame");
            };
            assert_eq!(out.pts(), expected);
        }
        assert!(matches!(unit.try_receive().unwrap(), Poll::Pending));
    }

    #[test]
    fn rejects_use_before_init() {
        let mut unit = PassthroughUnit::new();
        assert!(unit.submit(frame(0)).is_err());
    }

    #[test]
    fn zero_dimensions_fail_init() {
        let mut unit = PassthroughUnit::new();
        let err = unit
            .init(PixelFormat::Nv12, 0, 1080, &PropertyBag::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn latency_unit_withholds_output() {
        let mut unit = LatencyUnit::new(2);
        unit.init(PixelFormat::Nv12, 320, 240, &PropertyBag::new())
            .unwrap();
        assert!(matches!(unit.submit(frame(0)).unwrap(), Submit::Accepted));
        assert!(matches!(unit.try_receive().unwrap(), Poll::Pending));
        assert!(matches!(unit.try_receive().unwrap(), Poll::Pending));
        assert!(matches!(unit.try_receive().unwrap(), Poll::Frame(_)));
    }
}
