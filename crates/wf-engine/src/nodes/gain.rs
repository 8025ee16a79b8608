//! Gain node: per-sample amplitude scaling

use wf_core::SampleBuffer;
use wf_dsp::vector;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};
use crate::param::{AudioParam, ParamRenderer, ParamTag};

#[derive(Debug, Clone)]
pub struct GainOptions {
    pub gain: f32,
}

impl Default for GainOptions {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

pub(crate) struct GainProcessor {
    gain: ParamRenderer,
}

impl AudioProcessor for GainProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let values = self.gain.process_a_rate(
            scope.frames,
            scope.current_time,
            scope.sample_rate,
            scope.block,
        );
        for c in 0..buf.channel_count() {
            vector::multiply_assign(&mut buf.channel_mut(c)[..values.len()], values);
        }
        ProcessStatus::Active
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        (tag == ParamTag::Gain).then_some(&mut self.gain)
    }
}

/// Control handle for a gain node.
pub struct GainNode {
    node: NodeHandle,
    gain: AudioParam,
}

impl GainNode {
    pub fn gain(&self) -> &AudioParam {
        &self.gain
    }
}

impl AudioNode for GainNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_gain(&self, options: GainOptions) -> EngineResult<GainNode> {
        let id = self.alloc_node_id();
        let (renderer, gain) =
            self.make_param(id, ParamTag::Gain, options.gain, f32::MIN, f32::MAX)?;

        let node = self.register_node(
            id,
            Box::new(GainProcessor { gain: renderer }),
            NodeConfig::default(),
        )?;

        Ok(GainNode { node, gain })
    }
}
