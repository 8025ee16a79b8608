//! Real FFT wrapper
//!
//! Thin adapter over `realfft` holding the plans and scratch space for one
//! transform size, so render-time calls never allocate.

use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use wf_core::Sample;

/// Forward/inverse real FFT of a fixed size.
pub struct RealFft {
    size: usize,
    forward: Arc<dyn RealToComplex<Sample>>,
    inverse: Arc<dyn ComplexToReal<Sample>>,
    scratch_fwd: Vec<Complex<Sample>>,
    scratch_inv: Vec<Complex<Sample>>,
}

impl RealFft {
    /// Plan transforms for `size` (must be even; powers of two are fastest).
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<Sample>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_fwd = forward.make_scratch_vec();
        let scratch_inv = inverse.make_scratch_vec();
        Self {
            size,
            forward,
            inverse,
            scratch_fwd,
            scratch_inv,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex bins produced by the forward transform (`size/2 + 1`).
    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.size / 2 + 1
    }

    /// Allocate a correctly-sized spectrum buffer.
    pub fn make_spectrum(&self) -> Vec<Complex<Sample>> {
        vec![Complex::new(0.0, 0.0); self.spectrum_len()]
    }

    /// Forward transform. `input` is used as scratch and gets clobbered.
    pub fn forward(&mut self, input: &mut [Sample], spectrum: &mut [Complex<Sample>]) {
        debug_assert_eq!(input.len(), self.size);
        debug_assert_eq!(spectrum.len(), self.spectrum_len());
        self.forward
            .process_with_scratch(input, spectrum, &mut self.scratch_fwd)
            .ok();
    }

    /// Inverse transform with 1/N normalisation. `spectrum` gets clobbered.
    pub fn inverse(&mut self, spectrum: &mut [Complex<Sample>], output: &mut [Sample]) {
        debug_assert_eq!(output.len(), self.size);
        self.inverse
            .process_with_scratch(spectrum, output, &mut self.scratch_inv)
            .ok();
        let norm = 1.0 / self.size as f32;
        for s in output.iter_mut() {
            *s *= norm;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_round_trip() {
        let mut fft = RealFft::new(64);
        let original: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.3).sin()).collect();

        let mut time = original.clone();
        let mut spectrum = fft.make_spectrum();
        fft.forward(&mut time, &mut spectrum);

        let mut restored = vec![0.0f32; 64];
        fft.inverse(&mut spectrum, &mut restored);

        for (a, b) in original.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sine_lands_in_single_bin() {
        let size = 128;
        let mut fft = RealFft::new(size);
        // Bin 8: exactly 8 cycles over the window.
        let mut time: Vec<f32> = (0..size)
            .map(|i| (2.0 * std::f32::consts::PI * 8.0 * i as f32 / size as f32).sin())
            .collect();

        let mut spectrum = fft.make_spectrum();
        fft.forward(&mut time, &mut spectrum);

        let magnitudes: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();
        let peak_bin = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, 8);
        // Everything else is numerically silent.
        for (i, m) in magnitudes.iter().enumerate() {
            if i != 8 {
                assert!(*m < 1e-3, "bin {i} leaked: {m}");
            }
        }
    }
}
