// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Connectors — the links moving frames between stages.
//!
//! Every stage is fed by one connector. A connector accepts frames tagged
//! with a destination input slot, drives its downstream stage through the
//! submit/try-receive contract, and forwards produced output to successor
//! connectors:
//!
//! - **Direct**: no thread, no buffering. `dispatch` runs the transfer
//!   synchronously on the calling thread, so backpressure is immediate.
//!   Only single-input stages may be fed directly.
//! - **ThreadedQueue**: one bounded queue and one worker thread *per input
//!   slot*. Producers block when their queue is full — the bounded
//!   capacity is the backpressure mechanism, and per-slot workers keep a
//!   fan-in stage fed even while one of its slots is saturated.
//! - **ThreadedPoll**: like ThreadedQueue, but the worker also polls the
//!   downstream stage when no input is available, for stages that surface
//!   output asynchronously (presentation surfaces).
//!
//! End-of-stream arrives per input slot. Each slot worker flushes its
//! queue; the last one delivers the drain signal — retried with a bound
//! while the stage's saturated input refuses it — pumps the tail of the
//! stream until `Eof`, and propagates the signal downstream. Terminal
//! connectors report `Eof` on the pipeline event channel instead.
//!
//! Output forwarding happens under a pump lock, so a frame received from
//! the stage is dispatched downstream before any other worker can receive
//! the next one: per-connector FIFO order survives concurrent slot
//! workers.

use super::buffers::{BoundedQueue, PopResult};
use super::error::{PipelineError, Result};
use super::frame::Frame;
use super::loop_utils::{DRAIN_TIMEOUT, RETRY_INTERVAL, RetryBackoff, Wait};
use super::stage::{Drain, Poll, SharedStage, Stage, Submit};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// How a connector executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorMode {
    Direct,
    ThreadedQueue,
    ThreadedPoll,
}

impl ConnectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorMode::Direct => "direct",
            ConnectorMode::ThreadedQueue => "threaded-queue",
            ConnectorMode::ThreadedPoll => "threaded-poll",
        }
    }

    pub fn is_threaded(&self) -> bool {
        !matches!(self, ConnectorMode::Direct)
    }
}

/// Notifications from connectors and the source pump to the pipeline.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A terminal stage finished draining.
    Eof { stage: String },
    /// A stage hit a fatal backend error.
    Fatal {
        stage: String,
        error: PipelineError,
    },
}

/// Where one output slot of a stage sends its frames.
pub(crate) struct Route {
    pub(crate) target: Arc<Connector>,
    pub(crate) dst_slot: usize,
}

/// Worker poll interval when its input queue is empty.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct Connector {
    /// Name of the downstream stage (also used for worker thread names).
    name: String,
    mode: ConnectorMode,
    stage: SharedStage,
    /// One bounded queue per input slot (threaded modes).
    queues: Vec<Arc<BoundedQueue<Frame>>>,
    /// Per-output-slot routing, wired once after graph construction.
    routes: OnceLock<Vec<Option<Route>>>,
    output_slots: usize,
    /// Serializes receive-then-forward so concurrent slot workers cannot
    /// reorder the stage's output stream.
    pump_lock: Mutex<()>,
    /// Slot workers still running; the last one to finish drains the
    /// stage.
    active_workers: AtomicUsize,
    stop: Arc<AtomicBool>,
    events: Sender<PipelineEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    pub(crate) fn new(
        name: String,
        mode: ConnectorMode,
        capacity: usize,
        stage: SharedStage,
        stop: Arc<AtomicBool>,
        events: Sender<PipelineEvent>,
    ) -> Self {
        let (input_slots, output_slots) = {
            let stage = stage.lock();
            (stage.input_slots(), stage.output_slots())
        };
        Self {
            name,
            mode,
            stage,
            queues: (0..input_slots)
                .map(|_| Arc::new(BoundedQueue::new(capacity.max(1))))
                .collect(),
            routes: OnceLock::new(),
            output_slots,
            pump_lock: Mutex::new(()),
            active_workers: AtomicUsize::new(0),
            stop,
            events,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_routes(&self, routes: Vec<Option<Route>>) {
        debug_assert_eq!(routes.len(), self.output_slots);
        if self.routes.set(routes).is_err() {
            tracing::warn!(stage = %self.name, "connector routes set twice");
        }
    }

    fn routes(&self) -> &[Option<Route>] {
        self.routes.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_terminal(&self) -> bool {
        self.routes().iter().all(Option::is_none)
    }

    /// Hand a frame to this connector for the given input slot. Blocks on
    /// a full queue (threaded modes) or for the whole synchronous transfer
    /// (Direct).
    pub(crate) fn dispatch(&self, slot: usize, frame: Frame) -> Result<()> {
        match self.mode {
            ConnectorMode::Direct => self.transfer_in(slot, frame),
            ConnectorMode::ThreadedQueue | ConnectorMode::ThreadedPoll => {
                if !self.queues[slot].push(frame) {
                    // Stopped or closed underneath us; the frame is
                    // released here as part of teardown.
                    tracing::trace!(stage = %self.name, slot, "dispatch after queue close/stop");
                }
                Ok(())
            }
        }
    }

    /// Signal end-of-stream on one input slot. Each slot has exactly one
    /// producer; the last slot to finish drains the stage.
    pub(crate) fn finish(&self, slot: usize) -> Result<()> {
        match self.mode {
            ConnectorMode::Direct => self.finish_inline(),
            ConnectorMode::ThreadedQueue | ConnectorMode::ThreadedPoll => {
                self.queues[slot].close();
                Ok(())
            }
        }
    }

    /// Spawn one worker per input slot (threaded modes only).
    pub(crate) fn start(self: &Arc<Self>) -> Result<()> {
        if self.mode == ConnectorMode::Direct {
            return Ok(());
        }
        self.active_workers
            .store(self.queues.len(), Ordering::Release);
        let mut workers = self.workers.lock();
        for slot in 0..self.queues.len() {
            let this = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("connector-{}-{}", self.name, slot))
                .spawn(move || this.worker_loop(slot))
                .map_err(|e| PipelineError::stage(self.name.as_str(), format!("spawn failed: {e}")))?;
            workers.push(handle);
        }
        Ok(())
    }

    fn worker_loop(&self, slot: usize) {
        tracing::debug!(stage = %self.name, slot, mode = self.mode.as_str(), "connector worker started");
        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.queues[slot].pop_timeout(QUEUE_POLL_INTERVAL) {
                PopResult::Item(frame) => {
                    if let Err(error) = self.transfer_in(slot, frame) {
                        self.report_fatal(error);
                        break;
                    }
                }
                PopResult::Empty => {
                    // A polled downstream (e.g. a presentation surface)
                    // can surface output without fresh input.
                    if self.mode == ConnectorMode::ThreadedPoll {
                        if let Err(error) = self.pump_outputs() {
                            self.report_fatal(error);
                            break;
                        }
                    }
                }
                PopResult::Closed => {
                    // Queue flushed: report end-of-stream for this slot so
                    // fan-in stages can merge on without it, then let the
                    // last worker out drain the whole stage.
                    let drained = self.deliver_slot_drain(slot);
                    let last = self.active_workers.fetch_sub(1, Ordering::AcqRel) == 1;
                    match drained {
                        Err(error) => self.report_fatal(error),
                        Ok(()) => {
                            if last {
                                if let Err(error) = self.finish_inline() {
                                    self.report_fatal(error);
                                }
                            }
                        }
                    }
                    tracing::debug!(stage = %self.name, slot, "connector worker stopped");
                    return;
                }
                PopResult::Stopped => break,
            }
        }
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(stage = %self.name, slot, "connector worker stopped");
    }

    /// Submit one frame downstream (retrying on Full), then forward any
    /// output that became available.
    fn transfer_in(&self, slot: usize, frame: Frame) -> Result<()> {
        let mut backoff =
            RetryBackoff::new(RETRY_INTERVAL, None).with_stop(Arc::clone(&self.stop));
        let mut pending = Some(frame);
        while let Some(f) = pending.take() {
            let outcome = self.stage.lock().submit_to(slot, f)?;
            match outcome {
                Submit::Accepted | Submit::NeedMore => {}
                Submit::Full(f) => {
                    pending = Some(f);
                    // Give the stage a chance to make progress before the
                    // retry: pump whatever output it already produced.
                    self.pump_outputs()?;
                    match backoff.wait() {
                        Wait::Retry => {}
                        Wait::Stopped => return Ok(()),
                        Wait::TimedOut => unreachable!("submit retry has no deadline"),
                    }
                }
            }
        }
        self.pump_outputs()
    }

    /// Forward all ready output frames to successor connectors.
    ///
    /// Receive-then-forward runs under the pump lock so concurrent slot
    /// workers cannot interleave a later frame ahead of an earlier one.
    fn pump_outputs(&self) -> Result<()> {
        let _pump = self.pump_lock.lock();
        for (slot, route) in self.routes().iter().enumerate() {
            loop {
                let polled = self.stage.lock().try_receive_from(slot)?;
                match polled {
                    Poll::Frame(frame) => match route {
                        Some(route) => route.target.dispatch(route.dst_slot, frame)?,
                        None => {
                            tracing::trace!(
                                stage = %self.name,
                                slot,
                                "discarding frame from unrouted output"
                            );
                        }
                    },
                    Poll::Pending | Poll::Eof => break,
                }
            }
        }
        Ok(())
    }

    /// Deliver end-of-stream for one input slot, honoring the same
    /// bounded retry as the stage-wide drain.
    fn deliver_slot_drain(&self, slot: usize) -> Result<()> {
        let mut backoff = RetryBackoff::new(RETRY_INTERVAL, Some(DRAIN_TIMEOUT))
            .with_stop(Arc::clone(&self.stop));
        loop {
            let outcome = self.stage.lock().drain_slot(slot)?;
            match outcome {
                Drain::Accepted => return Ok(()),
                Drain::Full => {
                    self.pump_outputs()?;
                    match backoff.wait() {
                        Wait::Retry => {}
                        Wait::Stopped => return Ok(()),
                        Wait::TimedOut => {
                            return Err(PipelineError::DrainTimeout(DRAIN_TIMEOUT));
                        }
                    }
                }
            }
        }
    }

    /// Deliver the drain signal, pump the tail of the stream, propagate.
    fn finish_inline(&self) -> Result<()> {
        tracing::debug!(stage = %self.name, "draining");

        // The drain signal itself can be refused while the input queue is
        // saturated; retry is bounded so a wedged stage cannot hang stop.
        let mut backoff = RetryBackoff::new(RETRY_INTERVAL, Some(DRAIN_TIMEOUT))
            .with_stop(Arc::clone(&self.stop));
        loop {
            let outcome = self.stage.lock().drain()?;
            match outcome {
                Drain::Accepted => break,
                Drain::Full => {
                    self.pump_outputs()?;
                    match backoff.wait() {
                        Wait::Retry => {}
                        Wait::Stopped => return Ok(()),
                        Wait::TimedOut => {
                            return Err(PipelineError::DrainTimeout(DRAIN_TIMEOUT));
                        }
                    }
                }
            }
        }

        // Pump remaining output until every slot reports Eof.
        let mut backoff =
            RetryBackoff::new(RETRY_INTERVAL, None).with_stop(Arc::clone(&self.stop));
        loop {
            let mut all_eof = true;
            let mut forwarded = false;
            {
                let _pump = self.pump_lock.lock();
                for (slot, route) in self.routes().iter().enumerate() {
                    loop {
                        let polled = self.stage.lock().try_receive_from(slot)?;
                        match polled {
                            Poll::Frame(frame) => {
                                forwarded = true;
                                if let Some(route) = route {
                                    route.target.dispatch(route.dst_slot, frame)?;
                                }
                            }
                            Poll::Pending => {
                                all_eof = false;
                                break;
                            }
                            Poll::Eof => break,
                        }
                    }
                }
            }
            if all_eof {
                break;
            }
            if !forwarded {
                match backoff.wait() {
                    Wait::Retry => {}
                    Wait::Stopped => return Ok(()),
                    Wait::TimedOut => unreachable!("tail pump has no deadline"),
                }
            }
        }

        if self.is_terminal() {
            tracing::debug!(stage = %self.name, "terminal stage reached eof");
            let _ = self.events.send(PipelineEvent::Eof {
                stage: self.name.clone(),
            });
        } else {
            for route in self.routes().iter().flatten() {
                route.target.finish(route.dst_slot)?;
            }
        }
        Ok(())
    }

    fn report_fatal(&self, error: PipelineError) {
        tracing::error!(stage = %self.name, error = %error, "fatal stage error");
        let _ = self.events.send(PipelineEvent::Fatal {
            stage: self.name.clone(),
            error,
        });
    }

    /// Unblock producers and workers (pipeline stop).
    pub(crate) fn abort(&self) {
        for queue in &self.queues {
            queue.stop();
        }
    }

    /// Discard buffered frames (seek).
    pub(crate) fn clear_queue(&self) {
        for queue in &self.queues {
            queue.clear();
        }
    }

    /// Join all workers spawned by `start`.
    pub(crate) fn join(&self) {
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!(stage = %self.name, "connector worker panicked");
            }
        }
    }

    /// Reopen for another cycle (loop restart). Workers must be joined
    /// first.
    pub(crate) fn reset_for_restart(&self) {
        for queue in &self.queues {
            queue.reset();
        }
    }
}
