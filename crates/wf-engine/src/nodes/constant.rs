//! Constant source: a schedulable DC offset, usually a modulation source

use wf_core::SampleBuffer;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::events::EventBody;
use crate::node::{
    finish_if_stop_scheduled, update_playback_info, AudioProcessor, NodeConfig, ProcessScope,
    ProcessStatus,
};
use crate::param::{AudioParam, ParamRenderer, ParamTag};

#[derive(Debug, Clone)]
pub struct ConstantSourceOptions {
    pub offset: f32,
}

impl Default for ConstantSourceOptions {
    fn default() -> Self {
        Self { offset: 1.0 }
    }
}

pub(crate) struct ConstantSourceProcessor {
    offset: ParamRenderer,
}

impl AudioProcessor for ConstantSourceProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        buf.set_channel_count(1);
        let window = update_playback_info(
            scope.state(),
            buf,
            scope.frames,
            scope.sample_rate,
            scope.current_frame,
        );
        if window.is_silent() {
            buf.zero();
            return finish_if_stop_scheduled(scope);
        }

        let values = self.offset.process_a_rate(
            scope.frames,
            scope.current_time,
            scope.sample_rate,
            scope.block,
        );
        let end = (window.start_offset + window.frame_count).min(scope.frames);
        let out = buf.channel_mut(0);
        out[window.start_offset..end].copy_from_slice(&values[window.start_offset..end]);

        finish_if_stop_scheduled(scope)
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        (tag == ParamTag::Offset).then_some(&mut self.offset)
    }
}

/// Control handle for a constant source.
pub struct ConstantSourceNode {
    node: NodeHandle,
    offset: AudioParam,
}

impl ConstantSourceNode {
    pub fn offset(&self) -> &AudioParam {
        &self.offset
    }

    pub fn start(&self, when: f64) -> EngineResult<()> {
        self.node.schedule_start(when)
    }

    pub fn stop(&self, when: f64) -> EngineResult<()> {
        self.node.schedule_stop(when)
    }

    pub fn set_on_ended<F>(&self, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        self.node.register_ended_handler(handler)
    }
}

impl AudioNode for ConstantSourceNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_constant_source(
        &self,
        options: ConstantSourceOptions,
    ) -> EngineResult<ConstantSourceNode> {
        let id = self.alloc_node_id();
        let (renderer, offset) =
            self.make_param(id, ParamTag::Offset, options.offset, f32::MIN, f32::MAX)?;

        let node = self.register_node(
            id,
            Box::new(ConstantSourceProcessor { offset: renderer }),
            NodeConfig {
                channel_count: 1,
                is_source: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(ConstantSourceNode { node, offset })
    }
}
