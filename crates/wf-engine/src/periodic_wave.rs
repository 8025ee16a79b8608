//! Band-limited periodic wavetables
//!
//! Each wave is rendered once per octave range via the inverse real FFT,
//! halving the admitted partial count per range so that no table aliases at
//! the fundamental it serves. Sampling interpolates within a table and
//! cross-fades between adjacent ranges.

use wf_core::Sample;
use wf_dsp::{Complex, RealFft};

/// Basic oscillator waveforms; `Custom` comes from user coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OscillatorType {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Custom,
}

const TABLE_SIZE: usize = 2048;
const HALF_SIZE: usize = TABLE_SIZE / 2;

/// Pre-rendered band-limited tables for one waveform at one sample rate.
pub struct PeriodicWave {
    tables: Vec<Vec<Sample>>,
    nyquist: f32,
    rate_scale: f32,
}

impl PeriodicWave {
    /// Build from Fourier coefficients. `real` are cosine terms, `imag` sine
    /// terms; index 0 (DC) is ignored, matching the Web Audio convention.
    pub fn new(sample_rate: f32, real: &[f32], imag: &[f32], disable_normalization: bool) -> Self {
        let partials = real.len().max(imag.len()).min(HALF_SIZE);
        let range_count = (HALF_SIZE as f32).log2() as usize + 1;

        let mut fft = RealFft::new(TABLE_SIZE);
        let mut tables = Vec::with_capacity(range_count);

        for range in 0..range_count {
            let max_partials = (HALF_SIZE >> range).max(1);
            let mut spectrum = fft.make_spectrum();

            for n in 1..partials.min(max_partials + 1) {
                let re = real.get(n).copied().unwrap_or(0.0);
                let im = imag.get(n).copied().unwrap_or(0.0);
                // Half-spectrum convention: X[n] scaled so the inverse
                // produces re*cos + im*sin at unit amplitude.
                spectrum[n] = Complex::new(re, -im) * (HALF_SIZE as f32);
            }

            let mut table = vec![0.0f32; TABLE_SIZE];
            fft.inverse(&mut spectrum, &mut table);
            tables.push(table);
        }

        if !disable_normalization {
            // One scale for all ranges, taken from the full-bandwidth table.
            let peak = tables[0].iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if peak > 0.0 {
                let scale = 1.0 / peak;
                for table in &mut tables {
                    for s in table.iter_mut() {
                        *s *= scale;
                    }
                }
            }
        }

        Self {
            tables,
            nyquist: sample_rate / 2.0,
            rate_scale: TABLE_SIZE as f32 / sample_rate,
        }
    }

    /// Build one of the basic waveforms from its Fourier series.
    pub fn from_oscillator_type(sample_rate: f32, wave_type: OscillatorType) -> Self {
        let mut imag = vec![0.0f32; HALF_SIZE];
        let real = vec![0.0f32; HALF_SIZE];

        match wave_type {
            OscillatorType::Sine => {
                imag[1] = 1.0;
            }
            OscillatorType::Square => {
                for (n, b) in imag.iter_mut().enumerate().skip(1) {
                    if n % 2 == 1 {
                        *b = 4.0 / (n as f32 * std::f32::consts::PI);
                    }
                }
            }
            OscillatorType::Sawtooth => {
                for (n, b) in imag.iter_mut().enumerate().skip(1) {
                    let sign = if n % 2 == 0 { -1.0 } else { 1.0 };
                    *b = sign * 2.0 / (n as f32 * std::f32::consts::PI);
                }
            }
            OscillatorType::Triangle => {
                for (n, b) in imag.iter_mut().enumerate().skip(1) {
                    if n % 2 == 1 {
                        let sign = if n % 4 == 1 { 1.0 } else { -1.0 };
                        *b = sign * 8.0
                            / (std::f32::consts::PI * std::f32::consts::PI * (n * n) as f32);
                    }
                }
            }
            OscillatorType::Custom => {}
        }

        Self::new(sample_rate, &real, &imag, false)
    }

    /// Table length; oscillator phase runs modulo this.
    #[inline]
    pub fn table_size(&self) -> usize {
        TABLE_SIZE
    }

    /// Phase increment per Hz of fundamental.
    #[inline]
    pub fn rate_scale(&self) -> f32 {
        self.rate_scale
    }

    /// Sample the wave for `frequency` at `phase` (in table units).
    pub fn sample(&self, frequency: f32, phase: f32) -> Sample {
        // Ratio of requested partials to what the top range admits.
        let fundamental = frequency.abs().max(1e-3);
        let ratio = fundamental * HALF_SIZE as f32 / self.nyquist;
        let range_float = ratio.max(1.0).log2().max(0.0);

        let last = self.tables.len() - 1;
        let lower = (range_float as usize).min(last);
        let upper = (lower + 1).min(last);
        let blend = (range_float - lower as f32).clamp(0.0, 1.0);

        let index = phase as usize & (TABLE_SIZE - 1);
        let next = (index + 1) & (TABLE_SIZE - 1);
        let frac = phase - phase.floor();

        let sample_at = |table: &[Sample]| table[index] + frac * (table[next] - table[index]);

        let low = sample_at(&self.tables[lower]);
        if lower == upper {
            return low;
        }
        let high = sample_at(&self.tables[upper]);
        low + blend * (high - low)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_matches_reference() {
        let wave = PeriodicWave::from_oscillator_type(48000.0, OscillatorType::Sine);

        for k in 0..64 {
            let phase = k as f32 * TABLE_SIZE as f32 / 64.0;
            let expected = (2.0 * std::f32::consts::PI * phase / TABLE_SIZE as f32).sin();
            let got = wave.sample(440.0, phase);
            assert!((got - expected).abs() < 1e-3, "phase {phase}: {got} vs {expected}");
        }
    }

    #[test]
    fn test_normalized_peak_is_unity() {
        for wave_type in [
            OscillatorType::Square,
            OscillatorType::Sawtooth,
            OscillatorType::Triangle,
        ] {
            let wave = PeriodicWave::from_oscillator_type(48000.0, wave_type);
            let peak = wave.tables[0].iter().fold(0.0f32, |m, s| m.max(s.abs()));
            assert!((peak - 1.0).abs() < 1e-3, "{wave_type:?}: peak {peak}");
        }
    }

    #[test]
    fn test_high_fundamental_uses_band_limited_range() {
        let wave = PeriodicWave::from_oscillator_type(48000.0, OscillatorType::Square);

        // At 20 kHz only the fundamental fits below Nyquist, so the selected
        // table must be a pure (scaled) sine.
        let samples: Vec<f32> = (0..TABLE_SIZE)
            .map(|k| wave.sample(20_000.0, k as f32))
            .collect();
        let amplitude = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(amplitude > 0.1, "band-limited table is silent");

        for (k, s) in samples.iter().enumerate() {
            let reference =
                amplitude * (2.0 * std::f32::consts::PI * k as f32 / TABLE_SIZE as f32).sin();
            assert!(
                (s - reference).abs() < amplitude * 0.05,
                "sample {k}: {s} vs {reference}"
            );
        }
    }

    #[test]
    fn test_custom_coefficients() {
        // Single cosine partial.
        let wave = PeriodicWave::new(48000.0, &[0.0, 1.0], &[0.0, 0.0], false);
        let got = wave.sample(440.0, 0.0);
        assert!((got - 1.0).abs() < 1e-3);
    }
}
