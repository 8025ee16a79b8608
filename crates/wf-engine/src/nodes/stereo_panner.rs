//! Equal-power stereo panner
//!
//! <https://webaudio.github.io/web-audio-api/#stereopanner-algorithm>

use std::f32::consts::FRAC_PI_2;

use wf_core::mix::ChannelCountMode;
use wf_core::{SampleBuffer, RENDER_QUANTUM_SIZE};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};
use crate::param::{AudioParam, ParamRenderer, ParamTag};

#[derive(Debug, Clone, Default)]
pub struct StereoPannerOptions {
    pub pan: f32,
}

pub(crate) struct StereoPannerProcessor {
    pan: ParamRenderer,
    out: SampleBuffer,
}

impl AudioProcessor for StereoPannerProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let pan_values = self.pan.process_a_rate(
            scope.frames,
            scope.current_time,
            scope.sample_rate,
            scope.block,
        );

        let frames = scope.frames;
        let (out_l, out_r) = self.out.channel_pair_mut(0, 1);

        if buf.channel_count() == 1 {
            let input = buf.channel(0);
            for i in 0..frames {
                let pan = pan_values[i].clamp(-1.0, 1.0);
                let x = (pan + 1.0) / 2.0;
                let angle = x * FRAC_PI_2;

                out_l[i] = input[i] * angle.cos();
                out_r[i] = input[i] * angle.sin();
            }
        } else {
            let in_l = buf.channel(0);
            let in_r = buf.channel(1);
            for i in 0..frames {
                let pan = pan_values[i].clamp(-1.0, 1.0);
                let x = if pan <= 0.0 { pan + 1.0 } else { pan };
                let gain_l = (x * FRAC_PI_2).cos();
                let gain_r = (x * FRAC_PI_2).sin();

                if pan <= 0.0 {
                    out_l[i] = in_l[i] + in_r[i] * gain_l;
                    out_r[i] = in_r[i] * gain_r;
                } else {
                    out_l[i] = in_l[i] * gain_l;
                    out_r[i] = in_r[i] + in_l[i] * gain_r;
                }
            }
        }

        // Stereo out regardless of input width.
        buf.set_channel_count(2);
        buf.copy_from(&self.out);
        ProcessStatus::Active
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        (tag == ParamTag::Pan).then_some(&mut self.pan)
    }
}

/// Control handle for a stereo panner.
pub struct StereoPannerNode {
    node: NodeHandle,
    pan: AudioParam,
}

impl StereoPannerNode {
    pub fn pan(&self) -> &AudioParam {
        &self.pan
    }
}

impl AudioNode for StereoPannerNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_stereo_panner(
        &self,
        options: StereoPannerOptions,
    ) -> EngineResult<StereoPannerNode> {
        let id = self.alloc_node_id();
        let (renderer, pan) = self.make_param(id, ParamTag::Pan, options.pan, -1.0, 1.0)?;

        let node = self.register_node(
            id,
            Box::new(StereoPannerProcessor {
                pan: renderer,
                out: SampleBuffer::new(2, RENDER_QUANTUM_SIZE, self.sample_rate()),
            }),
            NodeConfig {
                channel_count: 2,
                mode: ChannelCountMode::ClampedMax,
                ..NodeConfig::default()
            },
        )?;

        Ok(StereoPannerNode { node, pan })
    }
}
