//! Channel adaptation: the speaker up/down-mix matrix and summing rules
//!
//! All mixes SUM into the destination rather than assigning, because a node
//! accumulates several inputs into one processing buffer. Channel layouts:
//! 1 = Mono, 2 = L,R, 4 = L,R,SL,SR, 5 = L,R,C,SL,SR, 6 = L,R,C,LFE,SL,SR.

use crate::buffer::SampleBuffer;

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Policy deciding the channel count a node processes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelCountMode {
    /// Process at the larger of input and configured count.
    #[default]
    Max,
    /// Process at the input count, clamped to the configured count.
    ClampedMax,
    /// Always process at the configured count.
    Explicit,
}

/// Policy selecting between the speaker matrix and index-wise summation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelInterpretation {
    #[default]
    Speakers,
    Discrete,
}

/// Sum `src` into `dst`, adapting `src` to `dst`'s active channel count.
///
/// `Speakers` uses the explicit matrix for the known layout pairs and falls
/// back to discrete summation otherwise. `Discrete` always sums index-wise:
/// extra destination channels are left untouched, extra source channels drop.
pub fn sum_into(dst: &mut SampleBuffer, src: &SampleBuffer, interpretation: ChannelInterpretation) {
    let frames = dst.frames().min(src.frames());
    let c_in = src.channel_count();
    let c_out = dst.channel_count();

    if interpretation == ChannelInterpretation::Discrete || c_in == c_out {
        sum_discrete(dst, src, frames);
        return;
    }

    match (c_in, c_out) {
        (1, 2) | (1, 4) => {
            let m = src.channel(0);
            add(dst.channel_mut(0), m, frames);
            add(dst.channel_mut(1), m, frames);
        }
        (1, 6) => {
            add(dst.channel_mut(2), src.channel(0), frames);
        }
        (2, 4) | (2, 6) => {
            add(dst.channel_mut(0), src.channel(0), frames);
            add(dst.channel_mut(1), src.channel(1), frames);
        }
        (4, 6) => {
            add(dst.channel_mut(0), src.channel(0), frames);
            add(dst.channel_mut(1), src.channel(1), frames);
            add(dst.channel_mut(4), src.channel(2), frames);
            add(dst.channel_mut(5), src.channel(3), frames);
        }
        (2, 1) => {
            let m = dst.channel_mut(0);
            for i in 0..frames {
                m[i] += 0.5 * (src.channel(0)[i] + src.channel(1)[i]);
            }
        }
        (4, 1) => {
            let m = dst.channel_mut(0);
            for i in 0..frames {
                m[i] += 0.25
                    * (src.channel(0)[i]
                        + src.channel(1)[i]
                        + src.channel(2)[i]
                        + src.channel(3)[i]);
            }
        }
        (6, 1) => {
            let m = dst.channel_mut(0);
            for i in 0..frames {
                m[i] += SQRT_HALF * (src.channel(0)[i] + src.channel(1)[i])
                    + src.channel(2)[i]
                    + 0.5 * (src.channel(4)[i] + src.channel(5)[i]);
            }
        }
        (4, 2) => {
            let l = dst.channel_mut(0);
            for i in 0..frames {
                l[i] += 0.5 * (src.channel(0)[i] + src.channel(2)[i]);
            }
            let r = dst.channel_mut(1);
            for i in 0..frames {
                r[i] += 0.5 * (src.channel(1)[i] + src.channel(3)[i]);
            }
        }
        (6, 2) => {
            let l = dst.channel_mut(0);
            for i in 0..frames {
                l[i] += src.channel(0)[i] + SQRT_HALF * (src.channel(2)[i] + src.channel(4)[i]);
            }
            let r = dst.channel_mut(1);
            for i in 0..frames {
                r[i] += src.channel(1)[i] + SQRT_HALF * (src.channel(2)[i] + src.channel(5)[i]);
            }
        }
        (6, 4) => {
            let l = dst.channel_mut(0);
            for i in 0..frames {
                l[i] += src.channel(0)[i] + SQRT_HALF * src.channel(2)[i];
            }
            let r = dst.channel_mut(1);
            for i in 0..frames {
                r[i] += src.channel(1)[i] + SQRT_HALF * src.channel(2)[i];
            }
            add(dst.channel_mut(2), src.channel(4), frames);
            add(dst.channel_mut(3), src.channel(5), frames);
        }
        _ => sum_discrete(dst, src, frames),
    }
}

fn sum_discrete(dst: &mut SampleBuffer, src: &SampleBuffer, frames: usize) {
    let channels = dst.channel_count().min(src.channel_count());
    for c in 0..channels {
        add(dst.channel_mut(c), src.channel(c), frames);
    }
}

#[inline]
fn add(dst: &mut [f32], src: &[f32], frames: usize) {
    for i in 0..frames {
        dst[i] += src[i];
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(channels: usize, data: &[&[f32]]) -> SampleBuffer {
        let frames = data[0].len();
        let mut b = SampleBuffer::new(channels, frames, 48000.0);
        for (c, ch) in data.iter().enumerate() {
            b.channel_mut(c).copy_from_slice(ch);
        }
        b
    }

    #[test]
    fn test_mono_to_stereo() {
        let src = buf(1, &[&[1.0, 2.0]]);
        let mut dst = SampleBuffer::new(2, 2, 48000.0);
        sum_into(&mut dst, &src, ChannelInterpretation::Speakers);
        assert_eq!(dst.channel(0), &[1.0, 2.0]);
        assert_eq!(dst.channel(1), &[1.0, 2.0]);
    }

    #[test]
    fn test_stereo_to_mono() {
        let src = buf(2, &[&[1.0, 2.0], &[3.0, 4.0]]);
        let mut dst = SampleBuffer::new(1, 2, 48000.0);
        sum_into(&mut dst, &src, ChannelInterpretation::Speakers);
        assert_eq!(dst.channel(0), &[2.0, 3.0]);
    }

    #[test]
    fn test_quad_to_mono() {
        let src = buf(4, &[&[1.0], &[2.0], &[3.0], &[4.0]]);
        let mut dst = SampleBuffer::new(1, 1, 48000.0);
        sum_into(&mut dst, &src, ChannelInterpretation::Speakers);
        assert!((dst.channel(0)[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_five_one_to_stereo() {
        let src = buf(6, &[&[1.0], &[2.0], &[0.5], &[9.0], &[0.25], &[0.75]]);
        let mut dst = SampleBuffer::new(2, 1, 48000.0);
        sum_into(&mut dst, &src, ChannelInterpretation::Speakers);

        let s = std::f32::consts::FRAC_1_SQRT_2;
        assert!((dst.channel(0)[0] - (1.0 + s * (0.5 + 0.25))).abs() < 1e-6);
        assert!((dst.channel(1)[0] - (2.0 + s * (0.5 + 0.75))).abs() < 1e-6);
    }

    #[test]
    fn test_discrete_drops_extras() {
        let src = buf(2, &[&[1.0], &[2.0]]);
        let mut dst = SampleBuffer::new(1, 1, 48000.0);
        sum_into(&mut dst, &src, ChannelInterpretation::Discrete);
        assert_eq!(dst.channel(0), &[1.0]);
    }

    #[test]
    fn test_mix_sums_rather_than_assigns() {
        let src = buf(1, &[&[1.0]]);
        let mut dst = SampleBuffer::new(2, 1, 48000.0);
        dst.channel_mut(0)[0] = 10.0;
        sum_into(&mut dst, &src, ChannelInterpretation::Speakers);
        assert_eq!(dst.channel(0)[0], 11.0);
    }
}
