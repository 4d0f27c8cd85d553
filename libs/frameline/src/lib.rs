// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! frameline: staged media pipeline with backpressure and A/V sync.
//!
//! Frames with presentation timestamps flow from a [`FrameSource`] through
//! a directed graph of [`Stage`]s into terminal sinks, linked by
//! connectors that run either synchronously or on worker threads with
//! bounded queues. The presenter paces frames against the wall clock
//! (wait early, drop late), two presenters share an [`AvSyncClock`], and a
//! [`LatencyMonitor`] measures per-frame submission-to-output latency.
//!
//! The actual media transforms live in opaque [`ProcessingUnit`]s consumed
//! strictly through submit/try-receive/drain; this crate supplies the
//! staging, orchestration, synchronization, and measurement around them.

pub mod core;

pub use core::buffers::BoundedQueue;
pub use core::config::{PropertyBag, PropertyValue};
pub use core::connection::ConnectorMode;
pub use core::error::{PipelineError, Result};
pub use core::frame::{AudioData, Frame, FramePayload, MediaKind, PixelFormat, VideoData};
pub use core::latency::{LatencyMonitor, LatencyReport, SUBMIT_TIME_PROPERTY};
pub use core::loop_utils::{DRAIN_TIMEOUT, RETRY_INTERVAL, RetryBackoff, Wait};
pub use core::media_clock::{
    ManualClock, MediaClock, MonotonicClock, TICKS_PER_MILLISECOND, TICKS_PER_SECOND,
    millis_to_ticks, ticks_to_millis,
};
pub use core::presenter::{
    AudioPresenter, CollectPresentTarget, DROP_THRESHOLD, NullPresentTarget, PresentTarget,
    PresentationStage, PresenterControl, PresenterMode, PresenterStats, VideoPresenter,
    WAIT_THRESHOLD,
};
pub use core::runtime::{
    LinkSpec, Pipeline, PipelineBuilder, PipelineOutcome, PipelineState, StageId, StopToken,
};
pub use core::sink::{CollectSink, FileWriterStage};
pub use core::source::{FrameSource, SourceItem, SyntheticAvSource, SyntheticSource};
pub use core::split::{Combiner, Splitter, StreamRouter};
pub use core::stage::{Drain, Poll, SharedStage, Stage, Submit, shared};
pub use core::sync::{AvSyncClock, DEFAULT_SYNC_TOLERANCE_TICKS};
pub use core::topology::TopologySnapshot;
pub use core::unit::{LatencyUnit, PassthroughUnit, ProcessingUnit, UnitStage};
