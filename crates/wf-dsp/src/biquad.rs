//! Biquad filter coefficients and state (Transposed Direct Form II)
//!
//! Coefficient formulas follow the Web Audio biquad definitions: lowpass and
//! highpass interpret Q in decibels, shelves take a fixed slope of 1, and the
//! centre frequency is scaled by `2^(detune/1200)` before use.

use num_complex::Complex;
use std::f32::consts::PI;

use crate::vector::detune_ratio;
use wf_core::Sample;

/// Biquad filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

/// Normalised biquad coefficients (a0 divided out).
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCoeffs {
    pub b0: Sample,
    pub b1: Sample,
    pub b2: Sample,
    pub a1: Sample,
    pub a2: Sample,
}

impl BiquadCoeffs {
    /// Pass-through coefficients.
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            ..Default::default()
        }
    }

    /// Compute coefficients for `filter_type` at the given parameters.
    pub fn compute(
        filter_type: FilterType,
        frequency: Sample,
        q: Sample,
        gain_db: Sample,
        detune_cents: Sample,
        sample_rate: Sample,
    ) -> Self {
        let nyquist = sample_rate / 2.0;
        let freq = (frequency * detune_ratio(detune_cents)).clamp(1.0, nyquist - 1.0);

        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let a = 10.0f32.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Lowpass => {
                // Q interpreted in dB for the resonant types.
                let alpha = sin_omega / (2.0 * 10.0f32.powf(q / 20.0));
                (
                    (1.0 - cos_omega) / 2.0,
                    1.0 - cos_omega,
                    (1.0 - cos_omega) / 2.0,
                    1.0 + alpha,
                    -2.0 * cos_omega,
                    1.0 - alpha,
                )
            }
            FilterType::Highpass => {
                let alpha = sin_omega / (2.0 * 10.0f32.powf(q / 20.0));
                (
                    (1.0 + cos_omega) / 2.0,
                    -(1.0 + cos_omega),
                    (1.0 + cos_omega) / 2.0,
                    1.0 + alpha,
                    -2.0 * cos_omega,
                    1.0 - alpha,
                )
            }
            FilterType::Bandpass => {
                let alpha = sin_omega / (2.0 * q.max(1e-4));
                (
                    alpha,
                    0.0,
                    -alpha,
                    1.0 + alpha,
                    -2.0 * cos_omega,
                    1.0 - alpha,
                )
            }
            FilterType::Notch => {
                let alpha = sin_omega / (2.0 * q.max(1e-4));
                (
                    1.0,
                    -2.0 * cos_omega,
                    1.0,
                    1.0 + alpha,
                    -2.0 * cos_omega,
                    1.0 - alpha,
                )
            }
            FilterType::Allpass => {
                let alpha = sin_omega / (2.0 * q.max(1e-4));
                (
                    1.0 - alpha,
                    -2.0 * cos_omega,
                    1.0 + alpha,
                    1.0 + alpha,
                    -2.0 * cos_omega,
                    1.0 - alpha,
                )
            }
            FilterType::Peaking => {
                let alpha = sin_omega / (2.0 * q.max(1e-4));
                (
                    1.0 + alpha * a,
                    -2.0 * cos_omega,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_omega,
                    1.0 - alpha / a,
                )
            }
            FilterType::Lowshelf => {
                // Fixed shelf slope S = 1.
                let alpha = sin_omega / 2.0 * std::f32::consts::SQRT_2;
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
            FilterType::Highshelf => {
                let alpha = sin_omega / 2.0 * std::f32::consts::SQRT_2;
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude and phase of the transfer function at `normalized_freq`
    /// (frequency / nyquist, in `[0, 1]`).
    pub fn frequency_response(&self, normalized_freq: Sample) -> (Sample, Sample) {
        let omega = -PI * normalized_freq;
        let z = Complex::new(omega.cos(), omega.sin());
        let numerator = Complex::new(self.b0, 0.0) + (Complex::new(self.b1, 0.0) + Complex::new(self.b2, 0.0) * z) * z;
        let denominator = Complex::new(1.0, 0.0) + (Complex::new(self.a1, 0.0) + Complex::new(self.a2, 0.0) * z) * z;
        let response = numerator / denominator;
        (response.norm(), response.im.atan2(response.re))
    }
}

/// Per-channel filter memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    z1: Sample,
    z2: Sample,
}

impl BiquadState {
    #[inline]
    pub fn process_sample(&mut self, c: &BiquadCoeffs, x: Sample) -> Sample {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }

    pub fn process_block(&mut self, c: &BiquadCoeffs, data: &mut [Sample]) {
        for x in data.iter_mut() {
            *x = self.process_sample(c, *x);
        }
        // Flush denormals out of the recursive state.
        if self.z1.abs() < 1e-15 {
            self.z1 = 0.0;
        }
        if self.z2.abs() < 1e-15 {
            self.z2 = 0.0;
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowpass_passes_dc_blocks_nyquist() {
        let c = BiquadCoeffs::compute(FilterType::Lowpass, 1000.0, 0.0, 0.0, 0.0, 48000.0);
        let (dc_mag, _) = c.frequency_response(0.0);
        let (ny_mag, _) = c.frequency_response(1.0);
        assert!((dc_mag - 1.0).abs() < 1e-3);
        assert!(ny_mag < 0.05);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let c = BiquadCoeffs::compute(FilterType::Highpass, 1000.0, 0.0, 0.0, 0.0, 48000.0);
        let (dc_mag, _) = c.frequency_response(0.0);
        let (ny_mag, _) = c.frequency_response(1.0);
        assert!(dc_mag < 1e-3);
        assert!((ny_mag - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_peaking_boost_at_center() {
        let c = BiquadCoeffs::compute(FilterType::Peaking, 1000.0, 1.0, 6.0, 0.0, 48000.0);
        let (mag, _) = c.frequency_response(1000.0 / 24000.0);
        let gain_db = 20.0 * mag.log10();
        assert!((gain_db - 6.0).abs() < 0.1, "got {gain_db} dB");
    }

    #[test]
    fn test_detune_shifts_center() {
        // +1200 cents doubles the frequency.
        let base = BiquadCoeffs::compute(FilterType::Peaking, 500.0, 2.0, 6.0, 1200.0, 48000.0);
        let doubled = BiquadCoeffs::compute(FilterType::Peaking, 1000.0, 2.0, 6.0, 0.0, 48000.0);
        let (m1, _) = base.frequency_response(1000.0 / 24000.0);
        let (m2, _) = doubled.frequency_response(1000.0 / 24000.0);
        assert!((m1 - m2).abs() < 1e-4);
    }

    #[test]
    fn test_identity_state_passthrough() {
        let c = BiquadCoeffs::identity();
        let mut state = BiquadState::default();
        let mut data = [1.0, -0.5, 0.25, 0.0];
        state.process_block(&c, &mut data);
        assert_eq!(data, [1.0, -0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_lowpass_attenuates_high_frequency_signal() {
        let sr = 48000.0;
        let c = BiquadCoeffs::compute(FilterType::Lowpass, 500.0, 0.0, 0.0, 0.0, sr);
        let mut state = BiquadState::default();

        // 12 kHz tone through a 500 Hz lowpass.
        let mut data: Vec<f32> = (0..4800)
            .map(|i| (2.0 * PI * 12000.0 * i as f32 / sr).sin())
            .collect();
        state.process_block(&c, &mut data);

        let tail_peak = data[2400..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail_peak < 0.01, "tail peak {tail_peak}");
    }
}
