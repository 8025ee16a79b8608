//! Linear sample-rate conversion
//!
//! Used on the control side to bring decoded buffers to the context rate.
//! Linear interpolation is deliberate: decoded sources do not promise
//! sub-sample accuracy, and the converter must stay allocation-light.

use wf_core::SampleBuffer;

/// Resample `src` to `target_rate` with per-channel linear interpolation.
///
/// Returns a clone when the rates already match.
pub fn resample_linear(src: &SampleBuffer, target_rate: f32) -> SampleBuffer {
    let src_rate = src.sample_rate();
    if (src_rate - target_rate).abs() < f32::EPSILON || src.frames() == 0 {
        let mut out = src.clone();
        if src.frames() == 0 {
            out = SampleBuffer::new(src.channel_count(), 0, target_rate);
        }
        return out;
    }

    let ratio = src_rate as f64 / target_rate as f64;
    let out_frames = ((src.frames() as f64) / ratio).round() as usize;
    let mut out = SampleBuffer::new(src.channel_count(), out_frames, target_rate);

    for c in 0..src.channel_count() {
        let input = src.channel(c);
        let output = out.channel_mut(c);
        for (i, o) in output.iter_mut().enumerate() {
            let pos = i as f64 * ratio;
            let index = pos as usize;
            let frac = (pos - index as f64) as f32;
            let a = input[index.min(input.len() - 1)];
            let b = input[(index + 1).min(input.len() - 1)];
            *o = a + frac * (b - a);
        }
    }

    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let mut src = SampleBuffer::new(1, 4, 48000.0);
        src.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let out = resample_linear(&src, 48000.0);
        assert_eq!(out.channel(0), src.channel(0));
    }

    #[test]
    fn test_downsample_halves_length() {
        let mut src = SampleBuffer::new(1, 8, 48000.0);
        for (i, s) in src.channel_mut(0).iter_mut().enumerate() {
            *s = i as f32;
        }
        let out = resample_linear(&src, 24000.0);
        assert_eq!(out.frames(), 4);
        assert_eq!(out.sample_rate(), 24000.0);
        // Every other source sample survives exactly.
        assert_eq!(out.channel(0), &[0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut src = SampleBuffer::new(1, 3, 24000.0);
        src.channel_mut(0).copy_from_slice(&[0.0, 1.0, 2.0]);
        let out = resample_linear(&src, 48000.0);
        assert_eq!(out.frames(), 6);
        assert!((out.channel(0)[1] - 0.5).abs() < 1e-6);
        assert!((out.channel(0)[2] - 1.0).abs() < 1e-6);
    }
}
