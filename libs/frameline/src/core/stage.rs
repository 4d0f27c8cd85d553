// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stage contract — the uniform submit/try-receive/drain surface every
//! processing step exposes to the pipeline.
//!
//! The contract is non-blocking by design: a stage never parks its caller.
//! Saturation (`Submit::Full`) and not-ready (`Poll::Pending`) are ordinary
//! statuses that the *caller* retries with a short backoff; only backend
//! failures travel through `Err(..)` and those are fatal to the pipeline.

use super::error::Result;
use super::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of handing a frame to a stage.
///
/// `Full` returns the rejected frame to the caller so it can be resubmitted
/// unchanged after a backoff.
#[derive(Debug)]
pub enum Submit {
    /// Frame accepted; output may become available via `try_receive`.
    Accepted,
    /// Frame buffered; the stage needs more input before producing output.
    NeedMore,
    /// Input queue saturated; retry with the returned frame after ~1 ms.
    Full(Frame),
}

/// Outcome of a non-blocking output poll.
#[derive(Debug)]
pub enum Poll {
    Frame(Frame),
    /// No output ready yet; retry after a short backoff.
    Pending,
    /// Drain has fully completed; no further output will appear.
    Eof,
}

/// Outcome of signalling end-of-input.
///
/// A saturated input queue can block the drain signal itself, so callers
/// keep invoking `drain` while it reports `Full`. Once a stage has accepted
/// the signal, further `drain` calls are no-ops that report `Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    Accepted,
    Full,
}

/// A pipeline processing step.
///
/// Stages with multiple inputs or outputs (combiner, splitter, router)
/// override the slot-indexed variants; single-slot stages only implement
/// the plain methods.
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// Hand a frame to the stage. Must not block.
    fn submit(&mut self, frame: Frame) -> Result<Submit>;

    /// Poll for an available output frame. Must not block.
    fn try_receive(&mut self) -> Result<Poll>;

    /// Signal that no more input will arrive. Re-entrant until `Accepted`.
    fn drain(&mut self) -> Result<Drain>;

    /// Signal end-of-stream on a single input slot. Fan-in stages override
    /// this so the merge can proceed without a finished branch; for
    /// single-input stages it is the same as `drain`.
    fn drain_slot(&mut self, slot: usize) -> Result<Drain> {
        debug_assert_eq!(slot, 0, "stage `{}` has a single input slot", self.name());
        self.drain()
    }

    /// Discard buffered frames (seek support).
    fn flush(&mut self) {}

    /// Reinitialize for another pass over the input (loop restart).
    fn reinit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release backing resources. Called during teardown, in reverse
    /// dependency order.
    fn terminate(&mut self) {}

    fn input_slots(&self) -> usize {
        1
    }

    fn output_slots(&self) -> usize {
        1
    }

    /// Slot-indexed submit for fan-in stages.
    fn submit_to(&mut self, slot: usize, frame: Frame) -> Result<Submit> {
        debug_assert_eq!(slot, 0, "stage `{}` has a single input slot", self.name());
        self.submit(frame)
    }

    /// Slot-indexed receive for fan-out stages.
    fn try_receive_from(&mut self, slot: usize) -> Result<Poll> {
        debug_assert_eq!(slot, 0, "stage `{}` has a single output slot", self.name());
        self.try_receive()
    }
}

/// Stages are shared between the pipeline and connector worker threads.
pub type SharedStage = Arc<Mutex<Box<dyn Stage>>>;

pub fn shared(stage: impl Stage + 'static) -> SharedStage {
    Arc::new(Mutex::new(Box::new(stage)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::{Frame, FramePayload, PixelFormat, VideoData};
    use std::sync::Arc as StdArc;

    struct EchoStage {
        held: Option<Frame>,
        drained: bool,
    }

    impl Stage for EchoStage {
        fn name(&self) -> &str {
            "echo"
        }

        fn submit(&mut self, frame: Frame) -> Result<Submit> {
            if self.held.is_some() {
                return Ok(Submit::Full(frame));
            }
            self.held = Some(frame);
            Ok(Submit::Accepted)
        }

        fn try_receive(&mut self) -> Result<Poll> {
            match self.held.take() {
                Some(frame) => Ok(Poll::Frame(frame)),
                None if self.drained => Ok(Poll::Eof),
                None => Ok(Poll::Pending),
            }
        }

        fn drain(&mut self) -> Result<Drain> {
            self.drained = true;
            Ok(Drain::Accepted)
        }
    }

    fn frame(pts: i64) -> Frame {
        Frame::video(
            VideoData {
                data: StdArc::new(vec![0; 4]),
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8,
            },
            pts,
        )
    }

    #[test]
    fn full_returns_the_frame() {
        let mut stage = EchoStage {
            held: None,
            drained: false,
        };
        assert!(matches!(stage.submit(frame(0)).unwrap(), Submit::Accepted));
        let Submit::Full(rejected) = stage.submit(frame(1)).unwrap() else {
            panic!("expected Full");
        };
        assert_eq!(rejected.pts(), 1);
        // Caller drains the output, then the rejected frame goes through.
        assert!(matches!(stage.try_receive().unwrap(), Poll::Frame(_)));
        assert!(matches!(stage.submit(rejected).unwrap(), Submit::Accepted));
    }

    #[test]
    fn eof_after_drain_and_empty() {
        let mut stage = EchoStage {
            held: None,
            drained: false,
        };
        assert!(matches!(stage.try_receive().unwrap(), Poll::Pending));
        assert_eq!(stage.drain().unwrap(), Drain::Accepted);
        assert!(matches!(stage.try_receive().unwrap(), Poll::Eof));
        // Drain stays idempotent after completion.
        assert_eq!(stage.drain().unwrap(), Drain::Accepted);
        assert!(matches!(stage.try_receive().unwrap(), Poll::Eof));
    }

    #[test]
    fn default_slots_are_single() {
        let stage = EchoStage {
            held: None,
            drained: false,
        };
        assert_eq!(stage.input_slots(), 1);
        assert_eq!(stage.output_slots(), 1);
    }

    #[test]
    fn shared_stage_is_usable_through_the_lock() {
        let stage = shared(EchoStage {
            held: None,
            drained: false,
        });
        let outcome = stage.lock().submit(frame(7)).unwrap();
        assert!(matches!(outcome, Submit::Accepted));
        let Poll::Frame(out) = stage.lock().try_receive().unwrap() else {
            panic!("expected the held frame back");
        };
        assert!(matches!(out.payload(), FramePayload::Video(_)));
        assert_eq!(out.pts(), 7);
    }
}
