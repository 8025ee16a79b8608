//! Delay line with tail draining
//!
//! A ring of `max_delay * sample_rate + 1` frames per channel. Each block
//! writes the input ahead of the read head by the current k-rate delay, then
//! reads the delayed block out. When the last live input disappears the node
//! keeps emitting for one full delay worth of frames before disabling.

use wf_core::{SampleBuffer, RENDER_QUANTUM_SIZE};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};
use crate::param::{AudioParam, ParamRenderer, ParamTag};

#[derive(Debug, Clone)]
pub struct DelayOptions {
    pub delay_time: f64,
    pub max_delay_time: f64,
}

impl Default for DelayOptions {
    fn default() -> Self {
        Self {
            delay_time: 0.0,
            max_delay_time: 1.0,
        }
    }
}

enum RingAction {
    Write,
    Read,
}

pub(crate) struct DelayProcessor {
    delay_time: ParamRenderer,
    ring: SampleBuffer,
    read_index: usize,
    sample_rate: f32,
    max_delay: f64,
    signalled_stop: bool,
    remaining_frames: i64,
}

impl DelayProcessor {
    /// Move one block between `buf` and the ring, handling wrap-around.
    /// Writes sum into the ring; reads sum into `buf` and clear the ring
    /// region behind them so overlapping writes keep accumulating cleanly.
    fn ring_op(&mut self, buf: &mut SampleBuffer, frames: usize, start: usize, action: RingAction) -> usize {
        let ring_len = self.ring.frames();
        let mut ring_index = start;
        let mut buf_index = 0;
        let mut left = frames;

        if ring_index + left > ring_len {
            let to_end = ring_len - ring_index;
            match action {
                RingAction::Write => self.ring.sum_range(buf, buf_index, ring_index, to_end),
                RingAction::Read => {
                    buf.sum_range(&self.ring, ring_index, buf_index, to_end);
                    self.ring.zero_range(ring_index, to_end);
                }
            }
            ring_index = 0;
            buf_index += to_end;
            left -= to_end;
        }

        match action {
            RingAction::Write => {
                self.ring.sum_range(buf, buf_index, ring_index, left);
                buf.zero();
            }
            RingAction::Read => {
                buf.sum_range(&self.ring, ring_index, buf_index, left);
                self.ring.zero_range(ring_index, left);
            }
        }

        ring_index + left
    }
}

impl AudioProcessor for DelayProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let frames = scope.frames;

        // Tail: inputs are gone, drain what is still buffered.
        if self.signalled_stop {
            if self.remaining_frames <= 0 {
                self.signalled_stop = false;
                return ProcessStatus::Finished;
            }
            self.read_index = self.ring_op(buf, frames, self.read_index, RingAction::Read);
            self.remaining_frames -= frames as i64;
            return ProcessStatus::Active;
        }

        let delay = self
            .delay_time
            .process_k_rate(scope.current_time, scope.block)
            .clamp(0.0, self.max_delay as f32);
        // Round so delay times expressed as frames/rate map back exactly.
        let offset = (delay as f64 * self.sample_rate as f64).round() as usize;
        let write_index = (self.read_index + offset) % self.ring.frames();

        self.ring_op(buf, frames, write_index, RingAction::Write);
        self.read_index = self.ring_op(buf, frames, self.read_index, RingAction::Read);

        ProcessStatus::Active
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        (tag == ParamTag::DelayTime).then_some(&mut self.delay_time)
    }

    fn on_inputs_disabled(&mut self) {
        self.signalled_stop = true;
        self.remaining_frames =
            (self.delay_time.last_value() as f64 * self.sample_rate as f64) as i64;
    }
}

/// Control handle for a delay node.
pub struct DelayNode {
    node: NodeHandle,
    delay_time: AudioParam,
}

impl DelayNode {
    pub fn delay_time(&self) -> &AudioParam {
        &self.delay_time
    }
}

impl AudioNode for DelayNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_delay(&self, options: DelayOptions) -> EngineResult<DelayNode> {
        if options.max_delay_time <= 0.0 || options.max_delay_time > 180.0 {
            return Err(EngineError::InvalidArgument(format!(
                "max delay time out of range: {}",
                options.max_delay_time
            )));
        }

        let id = self.alloc_node_id();
        let (renderer, delay_time) = self.make_param(
            id,
            ParamTag::DelayTime,
            options.delay_time as f32,
            0.0,
            options.max_delay_time as f32,
        )?;

        let sample_rate = self.sample_rate();
        // +1 frame so delay_time == max_delay_time still round-trips.
        let ring_frames = (options.max_delay_time * sample_rate as f64) as usize + 1;
        let ring_frames = ring_frames.max(RENDER_QUANTUM_SIZE + 1);

        let node = self.register_node(
            id,
            Box::new(DelayProcessor {
                delay_time: renderer,
                ring: SampleBuffer::new(2, ring_frames, sample_rate),
                read_index: 0,
                sample_rate,
                max_delay: options.max_delay_time,
                signalled_stop: false,
                remaining_frames: 0,
            }),
            NodeConfig {
                requires_tail: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(DelayNode { node, delay_time })
    }
}
