//! 2x/4x oversampling chains for nonlinear processing
//!
//! Zero-stuffed upsampling and decimating downsampling through a
//! Blackman-windowed sinc FIR. One instance per channel; history persists
//! across blocks so chained calls are continuous.

use crate::windows;
use wf_core::Sample;

/// Supported oversampling factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversampleFactor {
    #[default]
    None,
    X2,
    X4,
}

impl OversampleFactor {
    #[inline]
    pub fn ratio(self) -> usize {
        match self {
            OversampleFactor::None => 1,
            OversampleFactor::X2 => 2,
            OversampleFactor::X4 => 4,
        }
    }
}

/// Mono up/down sampler pair for one oversampling factor.
pub struct Oversampler {
    factor: usize,
    kernel: Vec<Sample>,
    /// Zero-stuffed history at the oversampled rate (upsampling path).
    up_history: Vec<Sample>,
    /// Oversampled history (downsampling path).
    down_history: Vec<Sample>,
    scratch: Vec<Sample>,
}

impl Oversampler {
    /// Build a sampler for `factor`, with a sinc kernel spanning `8 * factor`
    /// oversampled taps.
    pub fn new(factor: OversampleFactor, max_block: usize) -> Self {
        let factor = factor.ratio();
        let taps = 8 * factor + 1;
        let half = (taps / 2) as isize;
        let cutoff = 0.5 / factor as f32;

        let mut window = vec![0.0; taps];
        windows::blackman(&mut window, 1.0);

        let kernel: Vec<Sample> = (0..taps as isize)
            .map(|i| {
                let x = (i - half) as f32;
                let sinc = if x == 0.0 {
                    2.0 * cutoff
                } else {
                    (2.0 * std::f32::consts::PI * cutoff * x).sin() / (std::f32::consts::PI * x)
                };
                sinc * window[i as usize]
            })
            .collect();

        Self {
            factor,
            up_history: vec![0.0; taps - 1],
            down_history: vec![0.0; taps - 1],
            scratch: vec![0.0; (taps - 1) + max_block * factor],
            kernel,
        }
    }

    #[inline]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Upsample `input` into `output` (`input.len() * factor` frames).
    pub fn upsample(&mut self, input: &[Sample], output: &mut [Sample]) {
        let taps = self.kernel.len();
        let up_len = input.len() * self.factor;
        debug_assert!(output.len() >= up_len);

        // Extended zero-stuffed signal: history followed by this block.
        self.scratch[..taps - 1].copy_from_slice(&self.up_history);
        let block = &mut self.scratch[taps - 1..taps - 1 + up_len];
        block.fill(0.0);
        for (i, &s) in input.iter().enumerate() {
            block[i * self.factor] = s;
        }

        let gain = self.factor as f32;
        for (n, out) in output[..up_len].iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, &h) in self.kernel.iter().enumerate() {
                acc += h * self.scratch[n + taps - 1 - k];
            }
            *out = acc * gain;
        }

        let tail_start = taps - 1 + up_len - (taps - 1);
        self.up_history
            .copy_from_slice(&self.scratch[tail_start..taps - 1 + up_len]);
    }

    /// Filter and decimate `input` (`output.len() * factor` frames) into `output`.
    pub fn downsample(&mut self, input: &[Sample], output: &mut [Sample]) {
        let taps = self.kernel.len();
        let up_len = output.len() * self.factor;
        debug_assert!(input.len() >= up_len);

        self.scratch[..taps - 1].copy_from_slice(&self.down_history);
        self.scratch[taps - 1..taps - 1 + up_len].copy_from_slice(&input[..up_len]);

        for (m, out) in output.iter_mut().enumerate() {
            let n = m * self.factor;
            let mut acc = 0.0;
            for (k, &h) in self.kernel.iter().enumerate() {
                acc += h * self.scratch[n + taps - 1 - k];
            }
            *out = acc;
        }

        let tail_start = taps - 1 + up_len - (taps - 1);
        self.down_history
            .copy_from_slice(&self.scratch[tail_start..taps - 1 + up_len]);
    }

    pub fn reset(&mut self) {
        self.up_history.fill(0.0);
        self.down_history.fill(0.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_low_frequency_tone() {
        let mut os = Oversampler::new(OversampleFactor::X4, 128);
        let sr = 48000.0;

        let mut recovered = Vec::new();
        let mut up = vec![0.0; 128 * 4];
        let mut down = vec![0.0; 128];

        for block in 0..8 {
            let input: Vec<f32> = (0..128)
                .map(|i| {
                    let n = block * 128 + i;
                    (2.0 * std::f32::consts::PI * 440.0 * n as f32 / sr).sin()
                })
                .collect();
            os.upsample(&input, &mut up);
            os.downsample(&up, &mut down);
            recovered.extend_from_slice(&down);
        }

        // Skip the FIR transient, then compare against a delayed copy of the
        // tone (total group delay = taps-1 at the base rate for up+down).
        let delay = 8; // (taps-1)/factor per stage
        let peak: f32 = recovered[256..].iter().fold(0.0, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 0.05, "peak {peak}");

        for n in 256..recovered.len() {
            let expected =
                (2.0 * std::f32::consts::PI * 440.0 * (n - delay) as f32 / 48000.0).sin();
            assert!(
                (recovered[n] - expected).abs() < 0.05,
                "sample {n}: {} vs {expected}",
                recovered[n]
            );
        }
    }

    #[test]
    fn test_upsample_preserves_dc() {
        let mut os = Oversampler::new(OversampleFactor::X2, 64);
        let input = [1.0f32; 64];
        let mut up = vec![0.0; 128];

        // Run a few blocks to fill the FIR history.
        os.upsample(&input, &mut up);
        os.upsample(&input, &mut up);

        for &s in &up[32..] {
            assert!((s - 1.0).abs() < 0.05, "got {s}");
        }
    }
}
