//! Analysis window functions
//!
//! Blackman and Hann windows for spectral analysis, plus the WOLA
//! perfect-reconstruction normalisation used when an analysis window must
//! also reconstruct.

use std::f32::consts::PI;

use wf_core::Sample;

/// Fill `data` with a Hann window scaled by `amplitude`.
pub fn hann(data: &mut [Sample], amplitude: Sample) {
    let size = data.len();
    if size < 2 {
        return;
    }
    let step = 2.0 * PI / (size - 1) as f32;
    for (i, w) in data.iter_mut().enumerate() {
        *w = amplitude * 0.5 * (1.0 - (step * i as f32).cos());
    }
}

/// Fill `data` with a Blackman window scaled by `amplitude`.
pub fn blackman(data: &mut [Sample], amplitude: Sample) {
    let size = data.len();
    if size < 2 {
        return;
    }
    let step = 2.0 * PI / (size - 1) as f32;
    for (i, w) in data.iter_mut().enumerate() {
        let phase = step * i as f32;
        *w = amplitude * (0.42 - 0.50 * phase.cos() + 0.08 * (2.0 * phase).cos());
    }
}

/// Force STFT perfect reconstruction (WOLA) on an existing window for the
/// given hop interval: every comb of samples spaced `interval` apart is
/// normalised to unit energy.
pub fn force_perfect_reconstruction(data: &mut [Sample], interval: usize) {
    let len = data.len();
    for start in 0..interval.min(len) {
        let mut sum2 = 0.0f32;
        let mut index = start;
        while index < len {
            sum2 += data[index] * data[index];
            index += interval;
        }
        if sum2 <= 0.0 {
            continue;
        }
        let factor = 1.0 / sum2.sqrt();
        let mut index = start;
        while index < len {
            data[index] *= factor;
            index += interval;
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
    fn test_hann_endpoints_and_peak() {
        let mut w = [0.0f32; 9];
        hann(&mut w, 1.0);
        assert!(w[0].abs() < 1e-6);
        assert!(w[8].abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blackman_endpoints() {
        let mut w = [0.0f32; 9];
        blackman(&mut w, 1.0);
        // Classic Blackman reaches ~0 at the edges and 1 at the centre.
        assert!(w[0].abs() < 1e-5);
        assert!((w[4] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_wola_normalisation() {
        let mut w = vec![0.0f32; 64];
        hann(&mut w, 1.0);
        force_perfect_reconstruction(&mut w, 16);

        // After WOLA, each comb of samples at the hop interval has unit energy.
        for start in 0..16 {
            let sum2: f32 = (start..64).step_by(16).map(|i| w[i] * w[i]).sum();
            assert!((sum2 - 1.0).abs() < 1e-4, "comb {start}: {sum2}");
        }
    }
}
