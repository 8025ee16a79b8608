//! WaveShaper: table-lookup distortion with optional oversampling
//!
//! The curve is shared with the control thread behind a try-lock; if the
//! audio thread cannot take it the block passes through unmodified. Both
//! oversampling chains are pre-built per channel so switching factors never
//! allocates on the audio thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use wf_core::mix::ChannelCountMode;
use wf_core::{Sample, SampleBuffer, MAX_CHANNEL_COUNT, RENDER_QUANTUM_SIZE};
use wf_dsp::{OversampleFactor, Oversampler};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};

/// Oversampling selection, matching the Web Audio `OverSampleType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverSampleType {
    #[default]
    None,
    X2,
    X4,
}

impl OverSampleType {
    fn to_u8(self) -> u8 {
        match self {
            OverSampleType::None => 0,
            OverSampleType::X2 => 1,
            OverSampleType::X4 => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => OverSampleType::X2,
            2 => OverSampleType::X4,
            _ => OverSampleType::None,
        }
    }
}

#[derive(Clone, Default)]
pub struct WaveShaperOptions {
    pub curve: Option<Vec<f32>>,
    pub oversample: OverSampleType,
}

/// Shape one sample through the curve with linear interpolation.
#[inline]
fn shape(curve: &[f32], x: Sample) -> Sample {
    let last = curve.len() - 1;
    let position = (x + 1.0) * 0.5 * last as f32;
    if position <= 0.0 {
        return curve[0];
    }
    if position >= last as f32 {
        return curve[last];
    }
    let index = position as usize;
    let factor = position - index as f32;
    curve[index] + factor * (curve[index + 1] - curve[index])
}

struct ShaperLane {
    x2: Oversampler,
    x4: Oversampler,
}

pub(crate) struct WaveShaperProcessor {
    curve: Arc<Mutex<Option<Arc<Vec<f32>>>>>,
    oversample: Arc<AtomicU8>,
    lanes: Vec<ShaperLane>,
    up_buf: Vec<Sample>,
}

impl AudioProcessor for WaveShaperProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        // A blocked curve update wins: pass through untouched.
        let Some(guard) = self.curve.try_lock() else {
            return ProcessStatus::Active;
        };
        let Some(curve) = guard.as_ref() else {
            return ProcessStatus::Active;
        };

        let frames = scope.frames;
        let oversample = OverSampleType::from_u8(self.oversample.load(Ordering::Acquire));

        for c in 0..buf.channel_count() {
            let lane = &mut self.lanes[c];
            let channel = &mut buf.channel_mut(c)[..frames];

            match oversample {
                OverSampleType::None => {
                    for s in channel.iter_mut() {
                        *s = shape(curve, *s);
                    }
                }
                OverSampleType::X2 => {
                    let up = &mut self.up_buf[..frames * 2];
                    lane.x2.upsample(channel, up);
                    for s in up.iter_mut() {
                        *s = shape(curve, *s);
                    }
                    lane.x2.downsample(up, channel);
                }
                OverSampleType::X4 => {
                    let up = &mut self.up_buf[..frames * 4];
                    lane.x4.upsample(channel, up);
                    for s in up.iter_mut() {
                        *s = shape(curve, *s);
                    }
                    lane.x4.downsample(up, channel);
                }
            }
        }
        ProcessStatus::Active
    }
}

/// Control handle for a wave shaper.
pub struct WaveShaperNode {
    node: NodeHandle,
    curve: Arc<Mutex<Option<Arc<Vec<f32>>>>>,
    oversample: Arc<AtomicU8>,
}

impl WaveShaperNode {
    /// Replace the shaping curve. Serialised against the audio thread; the
    /// old curve is dropped here, off the render path.
    pub fn set_curve(&self, curve: Vec<f32>) -> EngineResult<()> {
        if curve.len() < 2 {
            return Err(crate::error::EngineError::InvalidArgument(
                "wave shaper curve needs at least two points".into(),
            ));
        }
        *self.curve.lock() = Some(Arc::new(curve));
        Ok(())
    }

    pub fn clear_curve(&self) {
        *self.curve.lock() = None;
    }

    pub fn curve(&self) -> Option<Arc<Vec<f32>>> {
        self.curve.lock().clone()
    }

    pub fn oversample(&self) -> OverSampleType {
        OverSampleType::from_u8(self.oversample.load(Ordering::Acquire))
    }

    /// Change the oversampling factor. The pre-built sinc chains keep their
    /// state; no re-initialisation is required.
    pub fn set_oversample(&self, oversample: OverSampleType) {
        self.oversample.store(oversample.to_u8(), Ordering::Release);
    }
}

impl AudioNode for WaveShaperNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_wave_shaper(&self, options: WaveShaperOptions) -> EngineResult<WaveShaperNode> {
        let id = self.alloc_node_id();

        let curve = Arc::new(Mutex::new(None));
        let oversample = Arc::new(AtomicU8::new(options.oversample.to_u8()));

        let lanes = (0..MAX_CHANNEL_COUNT)
            .map(|_| ShaperLane {
                x2: Oversampler::new(OversampleFactor::X2, RENDER_QUANTUM_SIZE),
                x4: Oversampler::new(OversampleFactor::X4, RENDER_QUANTUM_SIZE),
            })
            .collect();

        let node = self.register_node(
            id,
            Box::new(WaveShaperProcessor {
                curve: Arc::clone(&curve),
                oversample: Arc::clone(&oversample),
                lanes,
                up_buf: vec![0.0; RENDER_QUANTUM_SIZE * 4],
            }),
            NodeConfig {
                mode: ChannelCountMode::ClampedMax,
                ..NodeConfig::default()
            },
        )?;

        let shaper = WaveShaperNode {
            node,
            curve,
            oversample,
        };
        if let Some(curve) = options.curve {
            shaper.set_curve(curve)?;
        }
        Ok(shaper)
    }
}
