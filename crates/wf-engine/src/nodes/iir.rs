//! IIR filter with arbitrary feedforward/feedback coefficients
//!
//! Per-channel circular history arrays; coefficients are normalised at
//! creation so that `feedback[0] == 1`.

use wf_core::{SampleBuffer, MAX_CHANNEL_COUNT};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};

#[derive(Debug, Clone)]
pub struct IirFilterOptions {
    pub feedforward: Vec<f32>,
    pub feedback: Vec<f32>,
}

const MAX_COEFFICIENTS: usize = 20;

pub(crate) struct IirProcessor {
    feedforward: Vec<f32>,
    feedback: Vec<f32>,
    x_history: Vec<Vec<f32>>,
    y_history: Vec<Vec<f32>>,
    indices: [usize; MAX_CHANNEL_COUNT],
    mask: usize,
}

impl IirProcessor {
    fn new(feedforward: Vec<f32>, feedback: Vec<f32>) -> Self {
        let history_len = feedforward
            .len()
            .max(feedback.len())
            .next_power_of_two()
            .max(2);
        Self {
            x_history: (0..MAX_CHANNEL_COUNT).map(|_| vec![0.0; history_len]).collect(),
            y_history: (0..MAX_CHANNEL_COUNT).map(|_| vec![0.0; history_len]).collect(),
            indices: [0; MAX_CHANNEL_COUNT],
            mask: history_len - 1,
            feedforward,
            feedback,
        }
    }
}

impl AudioProcessor for IirProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let ff_len = self.feedforward.len();
        let fb_len = self.feedback.len();
        let min_len = ff_len.min(fb_len);
        let mask = self.mask;

        for c in 0..buf.channel_count() {
            let channel = &mut buf.channel_mut(c)[..scope.frames];
            let x = &mut self.x_history[c];
            let y = &mut self.y_history[c];
            let mut index = self.indices[c];

            for sample in channel.iter_mut() {
                let x_n = *sample;
                let mut y_n = self.feedforward[0] * x_n;

                for k in 1..min_len {
                    let m = index.wrapping_sub(k) & mask;
                    y_n += self.feedforward[k] * x[m];
                    y_n -= self.feedback[k] * y[m];
                }
                for k in min_len..ff_len {
                    y_n += self.feedforward[k] * x[index.wrapping_sub(k) & mask];
                }
                for k in min_len..fb_len {
                    y_n -= self.feedback[k] * y[index.wrapping_sub(k) & mask];
                }

                // Flush denormals out of the recursion.
                if y_n.abs() < 1e-15 {
                    y_n = 0.0;
                }

                *sample = y_n;
                x[index] = x_n;
                y[index] = y_n;
                index = (index + 1) & mask;
            }
            self.indices[c] = index;
        }
        ProcessStatus::Active
    }
}

/// Control handle for an IIR filter.
pub struct IirFilterNode {
    node: NodeHandle,
    feedforward: Vec<f32>,
    feedback: Vec<f32>,
    sample_rate: f32,
}

impl IirFilterNode {
    /// `|H|` and `arg H` at each frequency; NaN outside `[0, nyquist]`.
    pub fn get_frequency_response(
        &self,
        frequencies: &[f32],
        mag_response: &mut [f32],
        phase_response: &mut [f32],
    ) {
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

            let omega = -std::f32::consts::PI * normalized;
            let z = (omega.cos(), omega.sin());
            let numerator = evaluate_polynomial(&self.feedforward, z);
            let denominator = evaluate_polynomial(&self.feedback, z);

            // Complex division.
            let denom_norm = denominator.0 * denominator.0 + denominator.1 * denominator.1;
            let re = (numerator.0 * denominator.0 + numerator.1 * denominator.1) / denom_norm;
            let im = (numerator.1 * denominator.0 - numerator.0 * denominator.1) / denom_norm;

            *mag = (re * re + im * im).sqrt();
            *phase = im.atan2(re);
        }
    }
}

/// Horner evaluation of `sum(c[k] * z^k)`.
fn evaluate_polynomial(coefficients: &[f32], z: (f32, f32)) -> (f32, f32) {
    let mut result = (0.0f32, 0.0f32);
    for &c in coefficients.iter().rev() {
        let re = result.0 * z.0 - result.1 * z.1 + c;
        let im = result.0 * z.1 + result.1 * z.0;
        result = (re, im);
    }
    result
}

impl AudioNode for IirFilterNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_iir_filter(&self, options: IirFilterOptions) -> EngineResult<IirFilterNode> {
        let mut feedforward = options.feedforward;
        let mut feedback = options.feedback;

        if feedforward.is_empty()
            || feedback.is_empty()
            || feedforward.len() > MAX_COEFFICIENTS
            || feedback.len() > MAX_COEFFICIENTS
        {
            return Err(EngineError::InvalidArgument(
                "IIR filter needs 1..=20 coefficients on each side".into(),
            ));
        }
        if feedback[0] == 0.0 {
            return Err(EngineError::InvalidArgument(
                "feedback[0] must be non-zero".into(),
            ));
        }
        if feedforward.iter().all(|c| *c == 0.0) {
            return Err(EngineError::InvalidArgument(
                "feedforward must contain a non-zero coefficient".into(),
            ));
        }

        // Normalise so feedback[0] == 1.
        if feedback[0] != 1.0 {
            let scale = feedback[0];
            for c in feedback.iter_mut().skip(1) {
                *c /= scale;
            }
            for c in feedforward.iter_mut() {
                *c /= scale;
            }
            feedback[0] = 1.0;
        }

        let id = self.alloc_node_id();
        let node = self.register_node(
            id,
            Box::new(IirProcessor::new(feedforward.clone(), feedback.clone())),
            NodeConfig::default(),
        )?;

        Ok(IirFilterNode {
            node,
            feedforward,
            feedback,
            sample_rate: self.sample_rate(),
        })
    }
}
