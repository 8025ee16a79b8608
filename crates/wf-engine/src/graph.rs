//! Graph manager and render-side node graph
//!
//! Topology is mutated only between render quanta: control threads enqueue
//! tagged events on an SPSC channel and the audio thread drains them at the
//! start of each block (`pre_process`), then sweeps the registration vectors
//! for entries whose last control reference is gone and hands those to the
//! async destructor.
//!
//! The render graph owns every processor. Input and output sets are plain
//! `NodeId` lists, so node lifetime is governed entirely by the registry and
//! the control handles; destruction always proceeds off the audio thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use wf_core::mix::{self, ChannelCountMode};
use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::{Sample, SampleBuffer, MAX_CHANNEL_COUNT, RENDER_QUANTUM_SIZE};

use crate::clock::ContextClock;
use crate::destructor::AsyncDestructor;
use crate::error::{EngineError, EngineResult};
use crate::events::EventEmitter;
use crate::node::{
    AudioProcessor, NodeConfig, NodeState, PlaybackState, ProcessScope, ProcessStatus,
    RetiredResource,
};
use crate::param::{ParamState, ParamTag};

/// Render-side node identity. Non-owning: edges in the graph are id lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

// ═══════════════════════════════════════════════════════════════════════════════
// TOPOLOGY EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct NewNode {
    pub id: NodeId,
    pub processor: Box<dyn AudioProcessor>,
    pub state: Arc<NodeState>,
    pub config: NodeConfig,
}

pub(crate) enum TopologyEvent {
    AddNode(Box<NewNode>),
    AddParam(Arc<ParamState>),
    Connect { from: NodeId, to: NodeId },
    Disconnect { from: NodeId, to: NodeId },
    DisconnectAll { from: NodeId },
    ConnectParam { from: NodeId, to: NodeId, tag: ParamTag },
    DisconnectParam { from: NodeId, to: NodeId, tag: ParamTag },
}

/// Control-side half: allocates ids and queues topology events.
pub(crate) struct GraphManager {
    tx: parking_lot::Mutex<SpscSender<TopologyEvent>>,
    next_node_id: AtomicU64,
}

const TOPOLOGY_CHANNEL_CAPACITY: usize = 1024;

impl GraphManager {
    pub fn alloc_id(&self) -> NodeId {
        NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn send(&self, event: TopologyEvent) -> EngineResult<()> {
        self.tx
            .lock()
            .send(event)
            .map_err(|_| EngineError::InvalidState("graph has been torn down".into()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER GRAPH
// ═══════════════════════════════════════════════════════════════════════════════

struct RenderEntry {
    processor: Box<dyn AudioProcessor>,
    state: Arc<NodeState>,
    inputs: SmallVec<[NodeId; 4]>,
    outputs: SmallVec<[NodeId; 4]>,
    param_inputs: SmallVec<[(ParamTag, NodeId); 2]>,
    channel_count: usize,
    mode: ChannelCountMode,
    interpretation: wf_core::mix::ChannelInterpretation,
    requires_tail: bool,
    is_source: bool,
    enabled: bool,
    enabled_input_count: u32,
    last_block: u64,
    buf: SampleBuffer,
}

struct Registration {
    state: Arc<NodeState>,
    id: NodeId,
    requires_tail: bool,
}

/// Entry bundled off to the destructor thread.
struct RetiredNode {
    _processor: Box<dyn AudioProcessor>,
    _state: Arc<NodeState>,
    _buf: SampleBuffer,
}

/// The audio-thread side of the graph. Confined to whichever thread runs the
/// render callback; `Send` so the driver can move it there.
pub(crate) struct RenderGraph {
    nodes: HashMap<NodeId, RenderEntry>,
    rx: SpscReceiver<TopologyEvent>,
    source_registry: Vec<Registration>,
    processing_registry: Vec<Registration>,
    param_registry: Vec<Arc<ParamState>>,
    node_destructor: AsyncDestructor<RetiredNode>,
    resource_destructor: AsyncDestructor<RetiredResource>,
    clock: Arc<ContextClock>,
    events: EventEmitter,
    destination: NodeId,
    block: u64,
    /// Nodes that finished during the current quantum. Their disable
    /// cascade runs after the pull, when no entry is mid-flight.
    finished_nodes: Vec<NodeId>,
}

/// A strong reference besides the registry's own keeps a node alive: the
/// render entry. Anything above this count is a live control handle.
const REGISTRY_ONLY_COUNT: usize = 2;

impl RenderGraph {
    pub fn new(
        clock: Arc<ContextClock>,
        events: EventEmitter,
        destination: NodeId,
        destination_node: NewNode,
    ) -> (Self, GraphManager) {
        let (tx, rx) = spsc_channel(
            TOPOLOGY_CHANNEL_CAPACITY,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::BusyLoop,
        );

        let mut graph = Self {
            nodes: HashMap::with_capacity(64),
            rx,
            source_registry: Vec::with_capacity(32),
            processing_registry: Vec::with_capacity(32),
            param_registry: Vec::with_capacity(32),
            node_destructor: AsyncDestructor::new("nodes"),
            resource_destructor: AsyncDestructor::new("resources"),
            clock,
            events,
            destination,
            block: 0,
            finished_nodes: Vec::with_capacity(32),
        };
        graph.insert_node(destination_node);

        let manager = GraphManager {
            tx: parking_lot::Mutex::new(tx),
            // Id 0 is the destination.
            next_node_id: AtomicU64::new(destination.0 + 1),
        };
        (graph, manager)
    }

    /// Render one quantum and expose the destination's buffer.
    pub fn render_quantum(&mut self, frames: usize) -> &SampleBuffer {
        self.pre_process();
        self.block = self.block.wrapping_add(1);
        self.pull(self.destination, frames);

        // Finished nodes cascade now, with every entry back in the map, so
        // enabled-input counters and tail notifications are never missed on
        // an in-flight ancestor.
        while let Some(id) = self.finished_nodes.pop() {
            self.disable_node(id);
        }

        &self.nodes[&self.destination].buf
    }

    /// Render `output.len() / channels` frames of interleaved output,
    /// advancing the context clock.
    pub fn render_interleaved(&mut self, output: &mut [Sample], channels: usize) {
        let total_frames = output.len() / channels;
        let mut offset = 0;

        while offset < total_frames {
            // Device callbacks are rarely quantum-aligned; the tail chunk
            // renders short so node state never runs ahead of the clock.
            let frames = RENDER_QUANTUM_SIZE.min(total_frames - offset);
            self.render_quantum(frames);
            let dest = &self.nodes[&self.destination];
            dest.buf
                .interleave_frames_into(&mut output[offset * channels..], frames);
            self.clock.advance(frames as u64);
            offset += frames;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PRE-PROCESSING: TOPOLOGY + SWEEP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Drain pending topology events and sweep released registrations.
    /// Runs at the start of every render quantum, before any pull.
    pub fn pre_process(&mut self) {
        while let Ok(event) = self.rx.try_receive() {
            match event {
                TopologyEvent::AddNode(new_node) => self.insert_node(*new_node),
                TopologyEvent::AddParam(param) => self.param_registry.push(param),
                TopologyEvent::Connect { from, to } => self.connect(from, to),
                TopologyEvent::Disconnect { from, to } => self.disconnect(from, to),
                TopologyEvent::DisconnectAll { from } => self.disconnect_all(from),
                TopologyEvent::ConnectParam { from, to, tag } => self.connect_param(from, to, tag),
                TopologyEvent::DisconnectParam { from, to, tag } => {
                    self.disconnect_param(from, to, tag)
                }
            }
        }

        self.sweep_registrations();
    }

    fn insert_node(&mut self, new_node: NewNode) {
        let NewNode {
            id,
            processor,
            state,
            config,
        } = new_node;

        let capacity = MAX_CHANNEL_COUNT.max(config.channel_count);
        let buf = SampleBuffer::with_capacity(
            capacity,
            config.channel_count,
            RENDER_QUANTUM_SIZE,
            self.clock.sample_rate(),
        );

        let registration = Registration {
            state: Arc::clone(&state),
            id,
            requires_tail: config.requires_tail,
        };
        if config.is_source {
            self.source_registry.push(registration);
        } else {
            self.processing_registry.push(registration);
        }

        self.nodes.insert(
            id,
            RenderEntry {
                processor,
                state,
                inputs: SmallVec::new(),
                outputs: SmallVec::new(),
                param_inputs: SmallVec::new(),
                channel_count: config.channel_count,
                mode: config.mode,
                interpretation: config.interpretation,
                requires_tail: config.requires_tail,
                is_source: config.is_source,
                enabled: true,
                enabled_input_count: 0,
                last_block: u64::MAX,
                buf,
            },
        );
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        if from == to || !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return;
        }

        let mut from_enabled = false;
        if let Some(entry) = self.nodes.get_mut(&from) {
            if !entry.outputs.contains(&to) {
                entry.outputs.push(to);
            }
            from_enabled = entry.enabled;
        }
        if let Some(entry) = self.nodes.get_mut(&to) {
            if !entry.inputs.contains(&from) {
                entry.inputs.push(from);
                if from_enabled {
                    entry.enabled_input_count += 1;
                }
            }
        }
        if from_enabled {
            self.enable_node(to);
        }
    }

    fn disconnect(&mut self, from: NodeId, to: NodeId) {
        let Some(entry) = self.nodes.get_mut(&from) else {
            return;
        };
        let had_edge = if let Some(pos) = entry.outputs.iter().position(|id| *id == to) {
            entry.outputs.swap_remove(pos);
            true
        } else {
            false
        };
        let from_enabled = entry.enabled;

        if let Some(entry) = self.nodes.get_mut(&to) {
            if let Some(pos) = entry.inputs.iter().position(|id| *id == from) {
                entry.inputs.swap_remove(pos);
            }
        }

        if had_edge && from_enabled {
            self.on_input_disabled(to);
        }
    }

    fn disconnect_all(&mut self, from: NodeId) {
        let outputs: SmallVec<[NodeId; 4]> = match self.nodes.get(&from) {
            Some(entry) => entry.outputs.clone(),
            None => return,
        };
        for to in outputs {
            self.disconnect(from, to);
        }

        // Parameter edges live on the target side; sweep them out too.
        for entry in self.nodes.values_mut() {
            entry.param_inputs.retain(|(_, src)| *src != from);
        }
    }

    fn connect_param(&mut self, from: NodeId, to: NodeId, tag: ParamTag) {
        if !self.nodes.contains_key(&from) {
            return;
        }
        if let Some(entry) = self.nodes.get_mut(&to) {
            if !entry.param_inputs.contains(&(tag, from)) {
                entry.param_inputs.push((tag, from));
            }
        }
    }

    fn disconnect_param(&mut self, from: NodeId, to: NodeId, tag: ParamTag) {
        if let Some(entry) = self.nodes.get_mut(&to) {
            entry.param_inputs.retain(|pair| *pair != (tag, from));
        }
    }

    /// Enable a node (re-)gaining a live input, cascading downstream.
    fn enable_node(&mut self, id: NodeId) {
        let outputs: SmallVec<[NodeId; 4]> = {
            let Some(entry) = self.nodes.get_mut(&id) else {
                return;
            };
            if entry.enabled {
                return;
            }
            entry.enabled = true;
            entry.state.set_enabled(true);
            entry.outputs.clone()
        };
        for out in outputs {
            if let Some(entry) = self.nodes.get_mut(&out) {
                entry.enabled_input_count += 1;
            }
            self.enable_node(out);
        }
    }

    /// Disable a node and cascade the enabled-input counters downstream.
    fn disable_node(&mut self, id: NodeId) {
        let outputs: SmallVec<[NodeId; 4]> = {
            let Some(entry) = self.nodes.get_mut(&id) else {
                return;
            };
            if !entry.enabled {
                return;
            }
            entry.enabled = false;
            entry.state.set_enabled(false);
            entry.outputs.clone()
        };
        for out in outputs {
            self.on_input_disabled(out);
        }
    }

    /// One of `id`'s inputs went away. Tail nodes start draining; everything
    /// else with no remaining live input disables itself.
    fn on_input_disabled(&mut self, id: NodeId) {
        let (count, enabled, requires_tail, is_source) = {
            let Some(entry) = self.nodes.get_mut(&id) else {
                return;
            };
            entry.enabled_input_count = entry.enabled_input_count.saturating_sub(1);
            (
                entry.enabled_input_count,
                entry.enabled,
                entry.requires_tail,
                entry.is_source,
            )
        };

        if count == 0 && enabled && !is_source {
            if requires_tail {
                if let Some(entry) = self.nodes.get_mut(&id) {
                    entry.processor.on_inputs_disabled();
                }
            } else if id != self.destination {
                self.disable_node(id);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGISTRATION SWEEP
    // ═══════════════════════════════════════════════════════════════════════════

    fn sweep_registrations(&mut self) {
        let mut index = 0;
        while index < self.source_registry.len() {
            if self.try_release_source(index) {
                continue;
            }
            index += 1;
        }

        let mut index = 0;
        while index < self.processing_registry.len() {
            if self.try_release_processing(index) {
                continue;
            }
            index += 1;
        }

        let mut index = 0;
        while index < self.param_registry.len() {
            let param = &self.param_registry[index];
            if Arc::strong_count(param) == 1 && self.resource_destructor.has_capacity() {
                let param = self.param_registry.swap_remove(index);
                let _ = self
                    .resource_destructor
                    .try_consign(RetiredResource::Param(param));
                continue;
            }
            index += 1;
        }
    }

    fn try_release_source(&mut self, index: usize) -> bool {
        let registration = &self.source_registry[index];
        let playback = registration.state.playback_state();
        let releasable = Arc::strong_count(&registration.state) <= REGISTRY_ONLY_COUNT
            && matches!(playback, PlaybackState::Unscheduled | PlaybackState::Finished);

        if releasable && self.node_destructor.has_capacity() {
            let registration = self.source_registry.swap_remove(index);
            self.retire_node(registration.id);
            return true;
        }
        false
    }

    fn try_release_processing(&mut self, index: usize) -> bool {
        let registration = &self.processing_registry[index];
        let count_released =
            Arc::strong_count(&registration.state) <= REGISTRY_ONLY_COUNT;
        // Tail nodes handle their own shutdown; wait until they disabled.
        let releasable = if registration.requires_tail {
            count_released && !registration.state.is_enabled()
        } else {
            count_released
        };

        if releasable && self.node_destructor.has_capacity() {
            let registration = self.processing_registry.swap_remove(index);
            self.retire_node(registration.id);
            return true;
        }
        false
    }

    /// Detach a node from its neighbours and ship the entry off-thread.
    fn retire_node(&mut self, id: NodeId) {
        if id == self.destination {
            return;
        }
        let Some(entry) = self.nodes.remove(&id) else {
            return;
        };

        for src in &entry.inputs {
            if let Some(source) = self.nodes.get_mut(src) {
                if let Some(pos) = source.outputs.iter().position(|out| *out == id) {
                    source.outputs.swap_remove(pos);
                }
            }
        }

        let was_enabled = entry.enabled;
        let outputs = entry.outputs.clone();
        for out in &outputs {
            if let Some(target) = self.nodes.get_mut(out) {
                if let Some(pos) = target.inputs.iter().position(|input| *input == id) {
                    target.inputs.swap_remove(pos);
                }
            }
        }

        // Capacity was checked by the caller; consigning cannot fail here.
        let _ = self.node_destructor.try_consign(RetiredNode {
            _processor: entry.processor,
            _state: entry.state,
            _buf: entry.buf,
        });

        if was_enabled {
            for out in outputs {
                self.on_input_disabled(out);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PULL-BASED RENDERING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pull one node for the current block. Memoised per block; re-entrant
    /// pulls of an in-flight node (a host-created cycle) read silence.
    fn pull(&mut self, id: NodeId, frames: usize) {
        match self.nodes.get(&id) {
            Some(entry) if entry.last_block != self.block => {}
            _ => return,
        }

        // Taking the entry out of the map both enables recursion on `self`
        // and turns accidental cycles into silent inputs.
        let mut entry = match self.nodes.remove(&id) {
            Some(entry) => entry,
            None => return,
        };
        entry.last_block = self.block;

        if !entry.enabled {
            entry.buf.zero();
            self.nodes.insert(id, entry);
            return;
        }

        // Modulation inputs first: each connected live source is pulled and
        // its block summed into the parameter's inbox. Liveness is sampled
        // before the pull, so a source finishing inside this very block
        // still contributes its final frames.
        let param_inputs = entry.param_inputs.clone();
        for (tag, src) in param_inputs {
            let live = self.nodes.get(&src).map(|e| e.enabled).unwrap_or(false);
            if !live {
                continue;
            }
            self.pull(src, frames);
            if let Some(source) = self.nodes.get(&src) {
                if let Some(renderer) = entry.processor.param_mut(tag) {
                    renderer.add_modulation(self.block, &source.buf);
                }
            }
        }

        // Audio inputs, then channel adaptation and summing.
        let mut live_inputs: SmallVec<[NodeId; 4]> = SmallVec::new();
        for src in entry.inputs.clone() {
            let live = self.nodes.get(&src).map(|e| e.enabled).unwrap_or(false);
            if live {
                self.pull(src, frames);
                live_inputs.push(src);
            }
        }

        let computed = self.computed_channel_count(&entry, &live_inputs);
        entry.buf.set_channel_count(computed);
        entry.buf.zero();

        for src in &live_inputs {
            if let Some(source) = self.nodes.get(src) {
                mix::sum_into(&mut entry.buf, &source.buf, entry.interpretation);
            }
        }

        let scope = ProcessScope {
            frames,
            sample_rate: self.clock.sample_rate(),
            current_time: self.clock.current_time(),
            current_frame: self.clock.current_sample_frame(),
            block: self.block,
            state: &entry.state,
            events: &self.events,
            retire: &self.resource_destructor,
        };
        let status = entry.processor.process(&mut entry.buf, &scope);

        self.nodes.insert(id, entry);

        if status == ProcessStatus::Finished {
            self.finished_nodes.push(id);
        }
    }

    fn computed_channel_count(&self, entry: &RenderEntry, inputs: &[NodeId]) -> usize {
        let mut max_input = 0;
        for src in inputs {
            if let Some(source) = self.nodes.get(src) {
                max_input = max_input.max(source.buf.channel_count());
            }
        }
        if max_input == 0 {
            max_input = entry.channel_count;
        }

        match entry.mode {
            ChannelCountMode::Explicit => entry.channel_count,
            ChannelCountMode::ClampedMax => max_input.min(entry.channel_count),
            // max(C_in, C_out): the configured count is a floor, not a cap.
            ChannelCountMode::Max => max_input.max(entry.channel_count).min(MAX_CHANNEL_COUNT),
        }
    }
}
