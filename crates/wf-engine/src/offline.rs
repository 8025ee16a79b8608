//! Offline rendering context
//!
//! Pulls the same render graph as the realtime context, but on the calling
//! thread and as fast as the CPU allows, accumulating into an in-memory
//! buffer. Suspension points pause rendering at quantum boundaries so the
//! host can mutate the graph mid-render; rendering resumes when the
//! suspension callback returns.

use wf_core::{SampleBuffer, RENDER_QUANTUM_SIZE};

use crate::clock::ContextState;
use crate::context::BaseContext;
use crate::error::{EngineError, EngineResult};
use crate::graph::RenderGraph;

/// Renders a fixed number of frames into a buffer, then closes.
///
/// The graph is declared before the base context so its event emitter drops
/// first, releasing the dispatch thread the base joins on drop.
pub struct OfflineAudioContext {
    graph: RenderGraph,
    base: BaseContext,
    length: usize,
    rendered: usize,
    /// Quantum-aligned frames to pause at, sorted ascending.
    suspend_points: Vec<u64>,
    output: SampleBuffer,
}

impl OfflineAudioContext {
    pub fn new(channel_count: usize, length: usize, sample_rate: f32) -> EngineResult<Self> {
        if channel_count == 0 || channel_count > wf_core::MAX_CHANNEL_COUNT {
            return Err(EngineError::InvalidArgument(format!(
                "unsupported channel count {channel_count}"
            )));
        }
        if length == 0 {
            return Err(EngineError::InvalidArgument(
                "render length must be positive".into(),
            ));
        }

        let (base, graph) = BaseContext::new(sample_rate, channel_count);
        Ok(Self {
            base,
            graph,
            length,
            rendered: 0,
            suspend_points: Vec::new(),
            output: SampleBuffer::new(channel_count, length, sample_rate),
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Register a suspension at `when` seconds, rounded down to the render
    /// quantum containing it. Each point fires once.
    pub fn suspend_at(&mut self, when: f64) -> EngineResult<()> {
        if !when.is_finite() || when < 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "suspend time must be finite and non-negative, got {when}"
            )));
        }
        let frame = wf_core::time_to_sample_frame(when, self.base.sample_rate());
        let quantized = frame - frame % RENDER_QUANTUM_SIZE as u64;

        if quantized < self.rendered as u64 {
            return Err(EngineError::InvalidState(
                "suspend point is already behind the render head".into(),
            ));
        }
        if self.suspend_points.contains(&quantized) {
            return Err(EngineError::InvalidArgument(
                "suspend point already registered for this quantum".into(),
            ));
        }

        self.suspend_points.push(quantized);
        self.suspend_points.sort_unstable();
        Ok(())
    }

    /// Render the whole graph into the output buffer.
    pub fn start_rendering(self) -> EngineResult<SampleBuffer> {
        self.start_rendering_with(|_, _| {})
    }

    /// Render, invoking `on_suspend(context, time)` at each registered
    /// suspension point. The context is usable inside the callback (create
    /// nodes, connect, schedule); rendering resumes on return.
    pub fn start_rendering_with<F>(mut self, mut on_suspend: F) -> EngineResult<SampleBuffer>
    where
        F: FnMut(&OfflineAudioContext, f64),
    {
        if self.base.state() == ContextState::Closed {
            return Err(EngineError::InvalidState("context is closed".into()));
        }
        self.base.clock().set_state(ContextState::Running);

        while self.rendered < self.length {
            let head = self.rendered as u64;
            if self.suspend_points.first() == Some(&head) {
                self.suspend_points.remove(0);
                self.base.clock().set_state(ContextState::Suspended);
                let time = self.base.current_time();
                on_suspend(&self, time);
                self.base.clock().set_state(ContextState::Running);
            }

            let frames = RENDER_QUANTUM_SIZE.min(self.length - self.rendered);
            let quantum = self.graph.render_quantum(frames);
            self.output.copy_range(quantum, 0, self.rendered, frames);
            self.base.clock().advance(frames as u64);
            self.rendered += frames;
        }

        self.base.clock().set_state(ContextState::Closed);
        Ok(self.output)
    }
}

impl std::ops::Deref for OfflineAudioContext {
    type Target = BaseContext;

    fn deref(&self) -> &BaseContext {
        &self.base
    }
}
