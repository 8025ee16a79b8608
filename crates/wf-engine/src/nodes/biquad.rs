//! Biquad filter node
//!
//! Coefficients are recomputed per block from the k-rate parameter values;
//! per-channel TDF-II state carries across blocks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use wf_core::{SampleBuffer, MAX_CHANNEL_COUNT};
use wf_dsp::{BiquadCoeffs, BiquadState, FilterType};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};
use crate::param::{AudioParam, ParamRenderer, ParamTag};

#[derive(Debug, Clone)]
pub struct BiquadFilterOptions {
    pub filter_type: FilterType,
    pub frequency: f32,
    pub detune: f32,
    pub q: f32,
    pub gain: f32,
}

impl Default for BiquadFilterOptions {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            frequency: 350.0,
            detune: 0.0,
            q: 1.0,
            gain: 0.0,
        }
    }
}

fn filter_type_to_u8(t: FilterType) -> u8 {
    match t {
        FilterType::Lowpass => 0,
        FilterType::Highpass => 1,
        FilterType::Bandpass => 2,
        FilterType::Lowshelf => 3,
        FilterType::Highshelf => 4,
        FilterType::Peaking => 5,
        FilterType::Notch => 6,
        FilterType::Allpass => 7,
    }
}

fn filter_type_from_u8(v: u8) -> FilterType {
    match v {
        1 => FilterType::Highpass,
        2 => FilterType::Bandpass,
        3 => FilterType::Lowshelf,
        4 => FilterType::Highshelf,
        5 => FilterType::Peaking,
        6 => FilterType::Notch,
        7 => FilterType::Allpass,
        _ => FilterType::Lowpass,
    }
}

pub(crate) struct BiquadProcessor {
    frequency: ParamRenderer,
    detune: ParamRenderer,
    q: ParamRenderer,
    gain: ParamRenderer,
    filter_type: Arc<AtomicU8>,
    states: [BiquadState; MAX_CHANNEL_COUNT],
}

impl AudioProcessor for BiquadProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let time = scope.current_time;
        let frequency = self.frequency.process_k_rate(time, scope.block);
        let detune = self.detune.process_k_rate(time, scope.block);
        let q = self.q.process_k_rate(time, scope.block);
        let gain = self.gain.process_k_rate(time, scope.block);

        let coeffs = BiquadCoeffs::compute(
            filter_type_from_u8(self.filter_type.load(Ordering::Acquire)),
            frequency,
            q,
            gain,
            detune,
            scope.sample_rate,
        );

        for c in 0..buf.channel_count() {
            let frames = scope.frames;
            self.states[c].process_block(&coeffs, &mut buf.channel_mut(c)[..frames]);
        }
        ProcessStatus::Active
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        match tag {
            ParamTag::Frequency => Some(&mut self.frequency),
            ParamTag::Detune => Some(&mut self.detune),
            ParamTag::Q => Some(&mut self.q),
            ParamTag::Gain => Some(&mut self.gain),
            _ => None,
        }
    }
}

/// Control handle for a biquad filter.
pub struct BiquadFilterNode {
    node: NodeHandle,
    frequency: AudioParam,
    detune: AudioParam,
    q: AudioParam,
    gain: AudioParam,
    filter_type: Arc<AtomicU8>,
    sample_rate: f32,
}

impl BiquadFilterNode {
    pub fn frequency(&self) -> &AudioParam {
        &self.frequency
    }

    pub fn detune(&self) -> &AudioParam {
        &self.detune
    }

    pub fn q(&self) -> &AudioParam {
        &self.q
    }

    pub fn gain(&self) -> &AudioParam {
        &self.gain
    }

    pub fn filter_type(&self) -> FilterType {
        filter_type_from_u8(self.filter_type.load(Ordering::Acquire))
    }

    pub fn set_filter_type(&self, filter_type: FilterType) {
        self.filter_type
            .store(filter_type_to_u8(filter_type), Ordering::Release);
    }

    /// Magnitude/phase response at each frequency, computed from the current
    /// parameter values. Out-of-range frequencies yield NaN.
    pub fn get_frequency_response(
        &self,
        frequencies: &[f32],
        mag_response: &mut [f32],
        phase_response: &mut [f32],
    ) {
        let coeffs = BiquadCoeffs::compute(
            self.filter_type(),
            self.frequency.value(),
            self.q.value(),
            self.gain.value(),
            self.detune.value(),
            self.sample_rate,
        );
        let nyquist = self.sample_rate / 2.0;

        for ((f, mag), phase) in frequencies
            .iter()
            .zip(mag_response.iter_mut())
            .zip(phase_response.iter_mut())
        {
            let normalized = f / nyquist;
            if !(0.0..=1.0).contains(&normalized) {
                *mag = f32::NAN;
                *phase = f32::NAN;
                continue;
            }
            let (m, p) = coeffs.frequency_response(normalized);
            *mag = m;
            *phase = p;
        }
    }
}

impl AudioNode for BiquadFilterNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_biquad_filter(
        &self,
        options: BiquadFilterOptions,
    ) -> EngineResult<BiquadFilterNode> {
        let id = self.alloc_node_id();
        let nyquist = self.nyquist_frequency();

        let (frequency_renderer, frequency) =
            self.make_param(id, ParamTag::Frequency, options.frequency, 0.0, nyquist)?;
        let (detune_renderer, detune) =
            self.make_param(id, ParamTag::Detune, options.detune, -153600.0, 153600.0)?;
        let (q_renderer, q) = self.make_param(id, ParamTag::Q, options.q, f32::MIN, f32::MAX)?;
        let (gain_renderer, gain) =
            self.make_param(id, ParamTag::Gain, options.gain, f32::MIN, 1541.27)?;

        let filter_type = Arc::new(AtomicU8::new(filter_type_to_u8(options.filter_type)));

        let node = self.register_node(
            id,
            Box::new(BiquadProcessor {
                frequency: frequency_renderer,
                detune: detune_renderer,
                q: q_renderer,
                gain: gain_renderer,
                filter_type: Arc::clone(&filter_type),
                states: Default::default(),
            }),
            NodeConfig::default(),
        )?;

        Ok(BiquadFilterNode {
            node,
            frequency,
            detune,
            q,
            gain,
            filter_type,
            sample_rate: self.sample_rate(),
        })
    }
}
