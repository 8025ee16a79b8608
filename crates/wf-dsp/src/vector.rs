//! Element-wise buffer math and unit conversions
//!
//! Plain loops over `chunks_exact` so the compiler can vectorise; hot enough
//! to matter, simple enough to stay portable.

use wf_core::Sample;

/// `dst[i] += src[i]`
#[inline]
pub fn add_assign(dst: &mut [Sample], src: &[Sample]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

/// `dst[i] *= src[i]`
#[inline]
pub fn multiply_assign(dst: &mut [Sample], src: &[Sample]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d *= *s;
    }
}

/// `dst[i] = a[i] * b[i]`
#[inline]
pub fn multiply(a: &[Sample], b: &[Sample], dst: &mut [Sample]) {
    for ((d, x), y) in dst.iter_mut().zip(a).zip(b) {
        *d = *x * *y;
    }
}

/// `dst[i] += src[i] * gain`
#[inline]
pub fn add_scaled(dst: &mut [Sample], src: &[Sample], gain: Sample) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s * gain;
    }
}

/// `dst[i] *= gain`
#[inline]
pub fn scale(dst: &mut [Sample], gain: Sample) {
    for d in dst.iter_mut() {
        *d *= gain;
    }
}

/// Largest absolute value in the slice.
#[inline]
pub fn max_abs(data: &[Sample]) -> Sample {
    let mut peak: Sample = 0.0;
    // Four independent accumulators so the reduction pipelines.
    let mut peaks = [0.0f32; 4];
    let chunks = data.chunks_exact(4);
    let rest = chunks.remainder();
    for c in chunks {
        for (p, s) in peaks.iter_mut().zip(c) {
            *p = p.max(s.abs());
        }
    }
    for p in peaks {
        peak = peak.max(p);
    }
    for s in rest {
        peak = peak.max(s.abs());
    }
    peak
}

/// Interpolate between `source[first]` and `source[second]` by `factor`.
///
/// When both indices collapse onto the last sample, extrapolate from the
/// previous one so a ramp does not flatten at the boundary.
#[inline]
pub fn linear_interpolate(source: &[Sample], first: usize, second: usize, factor: Sample) -> Sample {
    if first == second && first >= 1 {
        return source[first] + factor * (source[first] - source[first - 1]);
    }
    source[first] + factor * (source[second] - source[first])
}

/// Linear gain to decibels.
#[inline]
pub fn linear_to_decibels(value: Sample) -> Sample {
    20.0 * value.log10()
}

/// Decibels to linear gain.
#[inline]
pub fn decibels_to_linear(value: Sample) -> Sample {
    10.0f32.powf(value / 20.0)
}

/// Cents offset to a frequency ratio: `2^(cents/1200)`.
#[inline]
pub fn detune_ratio(cents: Sample) -> Sample {
    if cents == 0.0 {
        1.0
    } else {
        2.0f32.powf(cents / 1200.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_multiply() {
        let mut dst = [1.0, 2.0, 3.0];
        add_assign(&mut dst, &[0.5, 0.5, 0.5]);
        assert_eq!(dst, [1.5, 2.5, 3.5]);

        multiply_assign(&mut dst, &[2.0, 0.0, 1.0]);
        assert_eq!(dst, [3.0, 0.0, 3.5]);
    }

    #[test]
    fn test_max_abs() {
        assert_eq!(max_abs(&[0.1, -0.9, 0.5, 0.2, -0.3]), 0.9);
        assert_eq!(max_abs(&[]), 0.0);
    }

    #[test]
    fn test_linear_interpolate() {
        let source = [0.0, 1.0, 2.0];
        assert!((linear_interpolate(&source, 0, 1, 0.25) - 0.25).abs() < 1e-6);
        // Collapsed indices extrapolate the last slope.
        assert!((linear_interpolate(&source, 2, 2, 0.5) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_decibel_round_trip() {
        let db = linear_to_decibels(0.5);
        assert!((decibels_to_linear(db) - 0.5).abs() < 1e-6);
        assert!((linear_to_decibels(1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_detune_ratio() {
        assert_eq!(detune_ratio(0.0), 1.0);
        assert!((detune_ratio(1200.0) - 2.0).abs() < 1e-6);
        assert!((detune_ratio(-1200.0) - 0.5).abs() < 1e-6);
    }
}
