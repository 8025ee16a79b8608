//! Oscillator: band-limited wavetable playback

use std::sync::Arc;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::SampleBuffer;
use wf_dsp::vector::detune_ratio;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBody;
use crate::node::{
    finish_if_stop_scheduled, update_playback_info, AudioProcessor, NodeConfig, ProcessScope,
    ProcessStatus, RetireStash, RetiredResource,
};
use crate::param::{AudioParam, ParamRenderer, ParamTag};
use crate::periodic_wave::{OscillatorType, PeriodicWave};

#[derive(Clone, Default)]
pub struct OscillatorOptions {
    pub oscillator_type: OscillatorType,
    pub frequency: f32,
    pub detune: f32,
    /// Custom wave; overrides `oscillator_type`.
    pub periodic_wave: Option<Arc<PeriodicWave>>,
}

const DEFAULT_FREQUENCY: f32 = 440.0;
// 1200 * log2(f32::MAX): widest detune that still maps to a finite ratio.
const MAX_DETUNE_CENTS: f32 = 1200.0 * 128.0;

pub(crate) struct OscillatorProcessor {
    frequency: ParamRenderer,
    detune: ParamRenderer,
    wave: Arc<PeriodicWave>,
    wave_rx: SpscReceiver<Arc<PeriodicWave>>,
    phase: f32,
    stash: RetireStash,
}

impl AudioProcessor for OscillatorProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        self.stash.flush(scope);
        while let Ok(wave) = self.wave_rx.try_receive() {
            let old = std::mem::replace(&mut self.wave, wave);
            self.stash.retire(scope, RetiredResource::Wave(old));
        }

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

        let freq = self.frequency.process_a_rate(
            scope.frames,
            scope.current_time,
            scope.sample_rate,
            scope.block,
        );
        let detune = self.detune.process_a_rate(
            scope.frames,
            scope.current_time,
            scope.sample_rate,
            scope.block,
        );

        let wave = &self.wave;
        let table_size = wave.table_size() as f32;
        let table_scale = wave.rate_scale();
        let end = (window.start_offset + window.frame_count).min(scope.frames);

        let out = buf.channel_mut(0);
        let mut phase = self.phase;
        for i in window.start_offset..end {
            let f = freq[i] * detune_ratio(detune[i]);

            out[i] = wave.sample(f, phase);

            phase += f * table_scale;
            if phase >= table_size {
                phase -= table_size;
            } else if phase < 0.0 {
                phase += table_size;
            }
        }
        self.phase = phase;

        finish_if_stop_scheduled(scope)
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        match tag {
            ParamTag::Frequency => Some(&mut self.frequency),
            ParamTag::Detune => Some(&mut self.detune),
            _ => None,
        }
    }
}

/// Control handle for an oscillator.
pub struct OscillatorNode {
    node: NodeHandle,
    frequency: AudioParam,
    detune: AudioParam,
    wave_tx: SpscSender<Arc<PeriodicWave>>,
}

impl OscillatorNode {
    pub fn frequency(&self) -> &AudioParam {
        &self.frequency
    }

    pub fn detune(&self) -> &AudioParam {
        &self.detune
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

    /// Swap in a custom periodic wave; applied at the next render block.
    pub fn set_periodic_wave(&self, wave: Arc<PeriodicWave>) -> EngineResult<()> {
        self.wave_tx
            .try_send(wave)
            .map_err(|_| EngineError::ResourceExhausted("oscillator wave queue full"))
    }
}

impl AudioNode for OscillatorNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_oscillator(&self, options: OscillatorOptions) -> EngineResult<OscillatorNode> {
        let id = self.alloc_node_id();
        let nyquist = self.nyquist_frequency();

        let frequency_default = if options.frequency != 0.0 {
            options.frequency
        } else {
            DEFAULT_FREQUENCY
        };
        let (frequency_renderer, frequency) = self.make_param(
            id,
            ParamTag::Frequency,
            frequency_default,
            -nyquist,
            nyquist,
        )?;
        let (detune_renderer, detune) = self.make_param(
            id,
            ParamTag::Detune,
            options.detune,
            -MAX_DETUNE_CENTS,
            MAX_DETUNE_CENTS,
        )?;

        let wave = match options.periodic_wave {
            Some(wave) => wave,
            None => self.basic_wave(options.oscillator_type)?,
        };

        let (wave_tx, wave_rx) = spsc_channel(4, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);

        let node = self.register_node(
            id,
            Box::new(OscillatorProcessor {
                frequency: frequency_renderer,
                detune: detune_renderer,
                wave,
                wave_rx,
                phase: 0.0,
                stash: RetireStash::default(),
            }),
            NodeConfig {
                channel_count: 1,
                is_source: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(OscillatorNode {
            node,
            frequency,
            detune,
            wave_tx,
        })
    }
}
