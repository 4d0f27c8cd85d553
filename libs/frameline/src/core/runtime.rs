// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline construction and lifecycle.
//!
//! [`PipelineBuilder`] assembles a DAG of stages and connector links,
//! validates it (single entry, acyclic, every stage reachable, slot
//! indices consistent), and produces a [`Pipeline`] in the `Ready` state.
//!
//! Lifecycle: `NotReady -> Ready -> Running -> {Paused, Frozen, Eof} ->
//! Running | Stopped`. A failed build is the `NotReady` case — the
//! pipeline object only exists from `Ready` on. Teardown runs in reverse
//! topological order: presentation-facing stages first, the source side
//! last, so nothing is released while a downstream thread may still
//! touch it.

use super::connection::{Connector, ConnectorMode, PipelineEvent, Route};
use super::error::{PipelineError, Result};
use super::latency::LatencyMonitor;
use super::presenter::{PresentationStage, PresenterControl, PresenterStats};
use super::source::{FrameSource, SourceItem};
use super::stage::{SharedStage, Stage, shared};
use super::sync::AvSyncClock;
use super::topology::{EdgeInfo, NodeInfo, TopologySnapshot};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::{Direction, algo};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Ready,
    Running,
    Paused,
    Frozen,
    Eof,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Ready => "Ready",
            PipelineState::Running => "Running",
            PipelineState::Paused => "Paused",
            PipelineState::Frozen => "Frozen",
            PipelineState::Eof => "Eof",
            PipelineState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// How `run()` came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// All terminal stages drained (and looping, if any, completed).
    Eof,
    /// A stop token ended playback.
    Stopped,
}

/// Handle to a stage added to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageId(NodeIndex);

/// Connector parameters for one edge of the graph.
#[derive(Debug, Clone, Copy)]
pub struct LinkSpec {
    pub mode: ConnectorMode,
    pub capacity: usize,
    pub from_slot: usize,
    pub to_slot: usize,
}

impl LinkSpec {
    pub fn direct() -> Self {
        Self {
            mode: ConnectorMode::Direct,
            capacity: 1,
            from_slot: 0,
            to_slot: 0,
        }
    }

    pub fn threaded(capacity: usize) -> Self {
        Self {
            mode: ConnectorMode::ThreadedQueue,
            capacity,
            from_slot: 0,
            to_slot: 0,
        }
    }

    pub fn threaded_poll(capacity: usize) -> Self {
        Self {
            mode: ConnectorMode::ThreadedPoll,
            capacity,
            from_slot: 0,
            to_slot: 0,
        }
    }

    pub fn from_slot(mut self, slot: usize) -> Self {
        self.from_slot = slot;
        self
    }

    pub fn to_slot(mut self, slot: usize) -> Self {
        self.to_slot = slot;
        self
    }
}

struct BuilderNode {
    name: String,
    stage: SharedStage,
    input_slots: usize,
    output_slots: usize,
}

/// Assembles and validates a pipeline graph.
pub struct PipelineBuilder {
    graph: DiGraph<BuilderNode, LinkSpec>,
    names: HashSet<String>,
    source: Option<Box<dyn FrameSource>>,
    entry: Option<NodeIndex>,
    entry_link: LinkSpec,
    avsync: Option<Arc<AvSyncClock>>,
    monitor: Option<Arc<LatencyMonitor>>,
    controls: Vec<Arc<PresenterControl>>,
    stats: Vec<Arc<PresenterStats>>,
    loop_playback: bool,
    max_cycles: Option<u64>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            names: HashSet::new(),
            source: None,
            entry: None,
            entry_link: LinkSpec::threaded(10),
            avsync: None,
            monitor: None,
            controls: Vec::new(),
            stats: Vec::new(),
            loop_playback: false,
            max_cycles: None,
        }
    }

    /// Add a stage; its `name()` must be unique within the pipeline.
    pub fn add_stage(&mut self, stage: impl Stage + 'static) -> Result<StageId> {
        let name = stage.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(PipelineError::Configuration(format!(
                "duplicate stage name `{name}`"
            )));
        }
        let input_slots = stage.input_slots();
        let output_slots = stage.output_slots();
        let idx = self.graph.add_node(BuilderNode {
            name,
            stage: shared(stage),
            input_slots,
            output_slots,
        });
        Ok(StageId(idx))
    }

    /// Connect `from`'s output to `to`'s input with the given link.
    pub fn connect(&mut self, from: StageId, to: StageId, link: LinkSpec) -> Result<()> {
        if from == to {
            return Err(PipelineError::Graph("self-loop".to_string()));
        }
        self.graph.add_edge(from.0, to.0, link);
        Ok(())
    }

    /// Set the frame source and the stage it feeds. `link` configures the
    /// entry connector between the pump thread and the first stage.
    pub fn set_source(
        &mut self,
        source: impl FrameSource + 'static,
        entry: StageId,
        link: LinkSpec,
    ) -> &mut Self {
        self.source = Some(Box::new(source));
        self.entry = Some(entry.0);
        self.entry_link = link;
        self
    }

    pub fn with_avsync(&mut self, avsync: Arc<AvSyncClock>) -> &mut Self {
        self.avsync = Some(avsync);
        self
    }

    pub fn with_monitor(&mut self, monitor: Arc<LatencyMonitor>) -> &mut Self {
        self.monitor = Some(monitor);
        self
    }

    /// Register a presentation stage so transport commands (pause, step,
    /// freeze) and stats queries reach it. Call before `add_stage`
    /// consumes the presenter.
    pub fn register_presenter(&mut self, presenter: &impl PresentationStage) -> &mut Self {
        self.controls.push(presenter.control());
        self.stats.push(presenter.stats());
        self
    }

    /// Restart from the beginning when the stream ends.
    pub fn loop_playback(&mut self, enabled: bool) -> &mut Self {
        self.loop_playback = enabled;
        self
    }

    /// Bound the number of loop cycles (useful for tests and benches).
    pub fn max_cycles(&mut self, cycles: u64) -> &mut Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let entry = self
            .entry
            .ok_or_else(|| PipelineError::Configuration("pipeline has no source".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| PipelineError::Configuration("pipeline has no source".to_string()))?;
        if self.graph.node_count() == 0 {
            return Err(PipelineError::Configuration(
                "pipeline has no stages".to_string(),
            ));
        }

        let order = algo::toposort(&self.graph, None)
            .map_err(|_| PipelineError::Graph("stage graph contains a cycle".to_string()))?;

        if self
            .graph
            .edges_directed(entry, Direction::Incoming)
            .next()
            .is_some()
        {
            return Err(PipelineError::Graph(
                "entry stage must not have upstream connections".to_string(),
            ));
        }

        // Every stage must be reachable from the entry.
        let mut reachable = 0usize;
        let mut bfs = Bfs::new(&self.graph, entry);
        while bfs.next(&self.graph).is_some() {
            reachable += 1;
        }
        if reachable != self.graph.node_count() {
            return Err(PipelineError::Graph(format!(
                "{} stage(s) unreachable from the entry",
                self.graph.node_count() - reachable
            )));
        }

        if self.graph[entry].input_slots != 1 {
            return Err(PipelineError::Graph(
                "entry stage must have exactly one input slot".to_string(),
            ));
        }

        // Validate slot usage and incoming-link consistency per node.
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];

            let mut seen_out = HashSet::new();
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let link = edge.weight();
                if link.from_slot >= node.output_slots {
                    return Err(PipelineError::Graph(format!(
                        "stage `{}` has no output slot {}",
                        node.name, link.from_slot
                    )));
                }
                if !seen_out.insert(link.from_slot) {
                    return Err(PipelineError::Graph(format!(
                        "output slot {} of `{}` connected twice",
                        link.from_slot, node.name
                    )));
                }
            }

            let mut seen_in = HashSet::new();
            let mut incoming: Option<(ConnectorMode, usize)> = None;
            for edge in self.graph.edges_directed(idx, Direction::Incoming) {
                let link = edge.weight();
                if link.to_slot >= node.input_slots {
                    return Err(PipelineError::Graph(format!(
                        "stage `{}` has no input slot {}",
                        node.name, link.to_slot
                    )));
                }
                if !seen_in.insert(link.to_slot) {
                    return Err(PipelineError::Graph(format!(
                        "input slot {} of `{}` connected twice",
                        link.to_slot, node.name
                    )));
                }
                // A single upstream thread cannot feed two slots of a
                // fan-in stage without wedging the merge; per-slot worker
                // threads require a threaded link.
                if node.input_slots > 1 && !link.mode.is_threaded() {
                    return Err(PipelineError::Graph(format!(
                        "fan-in stage `{}` requires threaded incoming links",
                        node.name
                    )));
                }
                match incoming {
                    None => incoming = Some((link.mode, link.capacity)),
                    Some((mode, capacity)) => {
                        if mode != link.mode || capacity != link.capacity {
                            return Err(PipelineError::Graph(format!(
                                "incoming links of `{}` disagree on mode/capacity",
                                node.name
                            )));
                        }
                    }
                }
            }
            // Every input slot of a non-entry stage needs a producer, or
            // its end-of-stream never arrives and the stage never drains.
            if idx != entry && seen_in.len() != node.input_slots {
                return Err(PipelineError::Graph(format!(
                    "stage `{}` has {} input slot(s) but {} incoming link(s)",
                    node.name,
                    node.input_slots,
                    seen_in.len()
                )));
            }
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        // One connector per stage, parameterized by its incoming link
        // (the entry stage uses the entry link).
        let mut connectors: HashMap<NodeIndex, Arc<Connector>> = HashMap::new();
        for &idx in &order {
            let node = &self.graph[idx];
            let (mode, capacity) = if idx == entry {
                (self.entry_link.mode, self.entry_link.capacity)
            } else {
                let link = self
                    .graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .map(|e| *e.weight())
                    .expect("non-entry node has incoming link");
                (link.mode, link.capacity)
            };
            let connector = Arc::new(Connector::new(
                node.name.clone(),
                mode,
                capacity,
                Arc::clone(&node.stage),
                Arc::clone(&stop),
                events_tx.clone(),
            ));
            connectors.insert(idx, connector);
        }

        // Wire output routes.
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let mut routes: Vec<Option<Route>> = (0..node.output_slots).map(|_| None).collect();
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let link = edge.weight();
                routes[link.from_slot] = Some(Route {
                    target: Arc::clone(&connectors[&edge.target()]),
                    dst_slot: link.to_slot,
                });
            }
            connectors[&idx].set_routes(routes);
        }

        let terminals: Vec<String> = self
            .graph
            .node_indices()
            .filter(|idx| {
                self.graph
                    .edges_directed(*idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].name.clone())
            .collect();

        let topology = TopologySnapshot {
            nodes: order
                .iter()
                .map(|idx| {
                    let node = &self.graph[*idx];
                    NodeInfo {
                        name: node.name.clone(),
                        input_slots: node.input_slots,
                        output_slots: node.output_slots,
                    }
                })
                .collect(),
            edges: self
                .graph
                .edge_indices()
                .map(|e| {
                    let (a, b) = self.graph.edge_endpoints(e).expect("edge endpoints");
                    let link = &self.graph[e];
                    EdgeInfo {
                        from: self.graph[a].name.clone(),
                        from_slot: link.from_slot,
                        to: self.graph[b].name.clone(),
                        to_slot: link.to_slot,
                        mode: link.mode.as_str().to_string(),
                        capacity: link.capacity,
                    }
                })
                .collect(),
        };

        let stages: Vec<(String, SharedStage)> = order
            .iter()
            .map(|idx| {
                let node = &self.graph[*idx];
                (node.name.clone(), Arc::clone(&node.stage))
            })
            .collect();
        let ordered_connectors: Vec<Arc<Connector>> = order
            .iter()
            .map(|idx| Arc::clone(&connectors[idx]))
            .collect();
        let entry_connector = Arc::clone(&connectors[&entry]);

        tracing::info!(
            stages = stages.len(),
            terminals = terminals.len(),
            loop_playback = self.loop_playback,
            "pipeline built"
        );

        Ok(Pipeline {
            state: PipelineState::Ready,
            source: Arc::new(Mutex::new(source)),
            stages,
            connectors: ordered_connectors,
            entry: entry_connector,
            terminals,
            eof_terminals: HashSet::new(),
            events_tx,
            events_rx,
            stop,
            pump: None,
            controls: self.controls,
            stats: self.stats,
            avsync: self.avsync,
            monitor: self.monitor,
            loop_playback: self.loop_playback,
            max_cycles: self.max_cycles,
            cycles_completed: 0,
            topology,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests a running pipeline to stop, from any thread.
#[derive(Clone)]
pub struct StopToken {
    stop: Arc<AtomicBool>,
    connectors: Vec<Arc<Connector>>,
}

impl StopToken {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        for connector in &self.connectors {
            connector.abort();
        }
    }
}

/// A built media pipeline.
pub struct Pipeline {
    state: PipelineState,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    /// Stages in topological order; teardown walks this in reverse.
    stages: Vec<(String, SharedStage)>,
    connectors: Vec<Arc<Connector>>,
    entry: Arc<Connector>,
    terminals: Vec<String>,
    eof_terminals: HashSet<String>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    controls: Vec<Arc<PresenterControl>>,
    stats: Vec<Arc<PresenterStats>>,
    avsync: Option<Arc<AvSyncClock>>,
    monitor: Option<Arc<LatencyMonitor>>,
    loop_playback: bool,
    max_cycles: Option<u64>,
    cycles_completed: u64,
    topology: TopologySnapshot,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("terminals", &self.terminals)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn topology(&self) -> &TopologySnapshot {
        &self.topology
    }

    pub fn stop_token(&self) -> StopToken {
        StopToken {
            stop: Arc::clone(&self.stop),
            connectors: self.connectors.clone(),
        }
    }

    /// Spawn connector workers and the source pump.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::WrongState {
                expected: PipelineState::Ready.to_string(),
                actual: self.state.to_string(),
            });
        }
        self.stop.store(false, Ordering::Release);
        for connector in &self.connectors {
            connector.start()?;
        }

        let source = Arc::clone(&self.source);
        let entry = Arc::clone(&self.entry);
        let stop = Arc::clone(&self.stop);
        let monitor = self.monitor.clone();
        let events = self.events_tx.clone();
        let pump = std::thread::Builder::new()
            .name("source-pump".to_string())
            .spawn(move || {
                tracing::debug!("source pump started");
                loop {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    let item = source.lock().next_frame();
                    match item {
                        Ok(SourceItem::Frame(mut frame)) => {
                            if let Some(monitor) = &monitor {
                                monitor.record_submit(&mut frame);
                            }
                            if let Err(error) = entry.dispatch(0, frame) {
                                let _ = events.send(PipelineEvent::Fatal {
                                    stage: "source".to_string(),
                                    error,
                                });
                                return;
                            }
                        }
                        Ok(SourceItem::Eof) => {
                            tracing::debug!("source reached eof");
                            if let Err(error) = entry.finish(0) {
                                let _ = events.send(PipelineEvent::Fatal {
                                    stage: "source".to_string(),
                                    error,
                                });
                            }
                            return;
                        }
                        Err(error) => {
                            let _ = events.send(PipelineEvent::Fatal {
                                stage: "source".to_string(),
                                error,
                            });
                            return;
                        }
                    }
                }
            })
            .map_err(|e| PipelineError::Source(format!("pump spawn failed: {e}")))?;
        self.pump = Some(pump);
        self.state = PipelineState::Running;
        tracing::info!("pipeline running");
        Ok(())
    }

    /// Drive the pipeline to completion (or until a stop token fires).
    /// Restarts automatically in loop mode.
    pub fn run(&mut self) -> Result<PipelineOutcome> {
        match self.state {
            PipelineState::Ready => self.start()?,
            PipelineState::Running | PipelineState::Paused | PipelineState::Frozen => {}
            other => {
                return Err(PipelineError::WrongState {
                    expected: "Ready or Running".to_string(),
                    actual: other.to_string(),
                });
            }
        }

        loop {
            match self.events_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(PipelineEvent::Eof { stage }) => {
                    tracing::debug!(stage = %stage, "terminal eof");
                    self.eof_terminals.insert(stage);
                    if self.eof_terminals.len() >= self.terminals.len() {
                        if !self.handle_eof()? {
                            return Ok(PipelineOutcome::Eof);
                        }
                    }
                }
                Ok(PipelineEvent::Fatal { stage, error }) => {
                    tracing::error!(stage = %stage, error = %error, "stopping after fatal error");
                    self.shutdown();
                    return Err(error);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop.load(Ordering::Acquire) {
                        self.shutdown();
                        return Ok(PipelineOutcome::Stopped);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return Ok(PipelineOutcome::Stopped);
                }
            }
        }
    }

    /// On full EOF: restart (loop mode, until `max_cycles`) or settle
    /// into `Eof`. Returns whether a restart happened.
    fn handle_eof(&mut self) -> Result<bool> {
        self.cycles_completed += 1;
        self.eof_terminals.clear();
        self.join_workers();

        let keep_looping = self.loop_playback
            && self
                .max_cycles
                .is_none_or(|max| self.cycles_completed < max);
        if !keep_looping {
            self.state = PipelineState::Eof;
            tracing::info!(cycles = self.cycles_completed, "pipeline reached eof");
            return Ok(false);
        }

        tracing::info!(cycle = self.cycles_completed, "loop restart");
        self.source
            .lock()
            .reset()
            .map_err(|e| PipelineError::Source(format!("reset failed: {e}")))?;
        for connector in &self.connectors {
            connector.reset_for_restart();
        }
        // Reinitialize in dependency order: source side first, presenter
        // last, so the restarted stream re-anchors cleanly.
        for (name, stage) in &self.stages {
            stage
                .lock()
                .reinit()
                .map_err(|e| PipelineError::stage(name.clone(), format!("reinit failed: {e}")))?;
        }
        if let Some(avsync) = &self.avsync {
            avsync.reset();
        }
        self.state = PipelineState::Ready;
        self.start()?;
        Ok(true)
    }

    /// Stop playback and tear the graph down. Idempotent.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        tracing::info!("stopping pipeline");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for connector in &self.connectors {
            connector.abort();
        }
        self.join_workers();
        // Reverse dependency order: presentation-facing stages first.
        for (name, stage) in self.stages.iter().rev() {
            tracing::debug!(stage = %name, "terminating stage");
            stage.lock().terminate();
        }
        if let Some(avsync) = &self.avsync {
            avsync.reset();
        }
        self.state = PipelineState::Stopped;
        tracing::info!("pipeline stopped");
    }

    fn join_workers(&mut self) {
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::error!("source pump panicked");
            }
        }
        for connector in &self.connectors {
            connector.join();
        }
    }

    /// Pause the presentation-facing stages. Upstream stages keep
    /// buffering, bounded by connector queue capacity.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::WrongState {
                expected: PipelineState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }
        for control in &self.controls {
            control.pause();
        }
        self.state = PipelineState::Paused;
        Ok(())
    }

    /// Resume playback (from `Paused`) or start it (from `Ready`).
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Paused => {
                for control in &self.controls {
                    control.resume();
                }
                self.state = PipelineState::Running;
                Ok(())
            }
            PipelineState::Ready => self.start(),
            PipelineState::Running => Ok(()),
            other => Err(PipelineError::WrongState {
                expected: "Ready, Paused or Running".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Advance one frame while paused.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running | PipelineState::Paused => {
                for control in &self.controls {
                    control.step();
                }
                self.state = PipelineState::Paused;
                Ok(())
            }
            other => Err(PipelineError::WrongState {
                expected: "Running or Paused".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Suspend timestamp pacing without tearing the graph down.
    pub fn freeze(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running | PipelineState::Paused => {
                for control in &self.controls {
                    control.freeze();
                }
                self.state = PipelineState::Frozen;
                Ok(())
            }
            other => Err(PipelineError::WrongState {
                expected: "Running or Paused".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn unfreeze(&mut self) -> Result<()> {
        if self.state != PipelineState::Frozen {
            return Err(PipelineError::WrongState {
                expected: PipelineState::Frozen.to_string(),
                actual: self.state.to_string(),
            });
        }
        for control in &self.controls {
            control.unfreeze();
        }
        self.state = PipelineState::Running;
        Ok(())
    }

    /// Seek: freeze pacing, flush everything in flight, reposition the
    /// source, unfreeze (which re-anchors the presenters).
    pub fn seek(&mut self, pts: i64) -> Result<()> {
        let was = self.state;
        if !matches!(was, PipelineState::Running | PipelineState::Paused) {
            return Err(PipelineError::WrongState {
                expected: "Running or Paused".to_string(),
                actual: was.to_string(),
            });
        }
        for control in &self.controls {
            control.freeze();
        }
        for connector in &self.connectors {
            connector.clear_queue();
        }
        for (_, stage) in &self.stages {
            stage.lock().flush();
        }
        self.source.lock().seek(pts)?;
        if let Some(avsync) = &self.avsync {
            avsync.reset();
        }
        if let Some(monitor) = &self.monitor {
            monitor.reset();
        }
        for control in &self.controls {
            control.unfreeze();
        }
        tracing::debug!(pts, "seek complete");
        Ok(())
    }

    /// Smoothed FPS of the first registered presenter.
    pub fn fps(&self) -> f64 {
        self.stats.first().map(|s| s.fps()).unwrap_or(0.0)
    }

    pub fn frames_presented(&self) -> u64 {
        self.stats.iter().map(|s| s.presented()).sum()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.stats.iter().map(|s| s.dropped()).sum()
    }

    pub fn duration(&self) -> Option<i64> {
        self.source.lock().duration()
    }

    pub fn position(&self) -> Option<i64> {
        self.source.lock().position()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state != PipelineState::Stopped {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PropertyBag;
    use crate::core::frame::PixelFormat;
    use crate::core::sink::CollectSink;
    use crate::core::source::SyntheticSource;
    use crate::core::unit::{PassthroughUnit, UnitStage};

    fn passthrough(name: &str) -> UnitStage {
        UnitStage::init(
            name,
            PassthroughUnit::boxed(),
            PixelFormat::Nv12,
            64,
            64,
            &PropertyBag::new(),
        )
        .unwrap()
    }

    #[test]
    fn build_rejects_missing_source() {
        let mut builder = Pipeline::builder();
        builder.add_stage(CollectSink::new("sink")).unwrap();
        let err = builder.build().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn build_rejects_duplicate_names() {
        let mut builder = Pipeline::builder();
        builder.add_stage(CollectSink::new("sink")).unwrap();
        let err = builder.add_stage(CollectSink::new("sink")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn build_rejects_cycles() {
        let mut builder = Pipeline::builder();
        let a = builder.add_stage(passthrough("a")).unwrap();
        let b = builder.add_stage(passthrough("b")).unwrap();
        builder.connect(a, b, LinkSpec::direct()).unwrap();
        builder.connect(b, a, LinkSpec::direct()).unwrap();
        let source = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 1).unwrap();
        builder.set_source(source, a, LinkSpec::direct());
        let err = builder.build().unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[test]
    fn build_rejects_unreachable_stages() {
        let mut builder = Pipeline::builder();
        let a = builder.add_stage(passthrough("a")).unwrap();
        let _orphan = builder.add_stage(passthrough("orphan")).unwrap();
        let source = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 1).unwrap();
        builder.set_source(source, a, LinkSpec::direct());
        let err = builder.build().unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[test]
    fn build_rejects_bad_slot_index() {
        let mut builder = Pipeline::builder();
        let a = builder.add_stage(passthrough("a")).unwrap();
        let b = builder.add_stage(passthrough("b")).unwrap();
        builder
            .connect(a, b, LinkSpec::direct().from_slot(3))
            .unwrap();
        let source = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 1).unwrap();
        builder.set_source(source, a, LinkSpec::direct());
        let err = builder.build().unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[test]
    fn topology_snapshot_reflects_graph() {
        let mut builder = Pipeline::builder();
        let a = builder.add_stage(passthrough("decoder")).unwrap();
        let b = builder.add_stage(CollectSink::new("sink")).unwrap();
        builder.connect(a, b, LinkSpec::threaded(4)).unwrap();
        let source = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 1).unwrap();
        builder.set_source(source, a, LinkSpec::direct());
        let pipeline = builder.build().unwrap();

        let topo = pipeline.topology();
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.edges.len(), 1);
        assert_eq!(topo.edges[0].mode, "threaded-queue");
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn transport_commands_require_matching_state() {
        let mut builder = Pipeline::builder();
        let a = builder.add_stage(passthrough("a")).unwrap();
        let source = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 0).unwrap();
        builder.set_source(source, a, LinkSpec::direct());
        let mut pipeline = builder.build().unwrap();

        assert!(matches!(
            pipeline.pause().unwrap_err(),
            PipelineError::WrongState { .. }
        ));
        assert!(matches!(
            pipeline.unfreeze().unwrap_err(),
            PipelineError::WrongState { .. }
        ));
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        // stop is idempotent
        pipeline.stop();
    }
}
