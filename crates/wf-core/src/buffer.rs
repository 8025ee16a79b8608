//! Multi-channel float32 PCM block with sample-rate metadata
//!
//! `SampleBuffer` is the unit of exchange between nodes: a fixed number of
//! frames across one or more contiguous channel arrays. Buffers are
//! pre-allocated on the control thread; render-time operations only read and
//! write existing storage.

use crate::error::{CoreError, CoreResult};
use crate::Sample;

/// A block of planar float32 PCM.
///
/// The buffer owns `capacity` channel arrays but exposes only the first
/// `active_channels` of them. Nodes that adapt their channel count per block
/// (clamped-max mode) shrink and grow the active set without reallocating.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    channels: Vec<Vec<Sample>>,
    active_channels: usize,
    frames: usize,
    sample_rate: f32,
}

impl SampleBuffer {
    /// Create a buffer with `channels` zeroed channel arrays of `frames` samples.
    pub fn new(channels: usize, frames: usize, sample_rate: f32) -> Self {
        Self {
            channels: (0..channels).map(|_| vec![0.0; frames]).collect(),
            active_channels: channels,
            frames,
            sample_rate,
        }
    }

    /// Create a buffer that owns `capacity` channels but activates only `active`.
    pub fn with_capacity(capacity: usize, active: usize, frames: usize, sample_rate: f32) -> Self {
        debug_assert!(active <= capacity);
        Self {
            channels: (0..capacity).map(|_| vec![0.0; frames]).collect(),
            active_channels: active,
            frames,
            sample_rate,
        }
    }

    /// Build a buffer from existing channel data. All channels must share a length.
    pub fn from_channels(data: Vec<Vec<Sample>>, sample_rate: f32) -> CoreResult<Self> {
        let frames = data.first().map(|c| c.len()).unwrap_or(0);
        if data.is_empty() {
            return Err(CoreError::InvalidChannelCount(0));
        }
        for c in &data {
            if c.len() != frames {
                return Err(CoreError::LengthMismatch {
                    expected: frames,
                    actual: c.len(),
                });
            }
        }
        let active_channels = data.len();
        Ok(Self {
            channels: data,
            active_channels,
            frames,
            sample_rate,
        })
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.active_channels
    }

    #[inline]
    pub fn channel_capacity(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Duration of the buffer in seconds.
    #[inline]
    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Change the active channel count. The target must fit the allocation.
    #[inline]
    pub fn set_channel_count(&mut self, channels: usize) {
        debug_assert!(channels <= self.channels.len());
        self.active_channels = channels.min(self.channels.len()).max(1);
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        &mut self.channels[index]
    }

    /// Iterate over the active channels mutably (for APIs that need all
    /// channel slices at once).
    pub fn channels_iter_mut(&mut self) -> impl Iterator<Item = &mut [Sample]> {
        self.channels
            .iter_mut()
            .take(self.active_channels)
            .map(|c| c.as_mut_slice())
    }

    /// Borrow two distinct channels mutably (left/right style processing).
    pub fn channel_pair_mut(&mut self, a: usize, b: usize) -> (&mut [Sample], &mut [Sample]) {
        debug_assert!(a < b);
        let (head, tail) = self.channels.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    }

    /// Zero every active channel.
    pub fn zero(&mut self) {
        for ch in self.channels.iter_mut().take(self.active_channels) {
            ch.fill(0.0);
        }
    }

    /// Zero `len` frames of every active channel starting at `start`.
    pub fn zero_range(&mut self, start: usize, len: usize) {
        let end = (start + len).min(self.frames);
        if start >= end {
            return;
        }
        for ch in self.channels.iter_mut().take(self.active_channels) {
            ch[start..end].fill(0.0);
        }
    }

    /// Index-wise copy from `src` over the common channels.
    pub fn copy_from(&mut self, src: &SampleBuffer) {
        let frames = self.frames.min(src.frames);
        self.copy_range(src, 0, 0, frames);
    }

    /// Index-wise copy of `len` frames from `src[src_start..]` to `self[dst_start..]`.
    pub fn copy_range(&mut self, src: &SampleBuffer, src_start: usize, dst_start: usize, len: usize) {
        let channels = self.active_channels.min(src.active_channels);
        for c in 0..channels {
            let dst = &mut self.channels[c][dst_start..dst_start + len];
            dst.copy_from_slice(&src.channels[c][src_start..src_start + len]);
        }
    }

    /// Index-wise sum of `len` frames from `src[src_start..]` into `self[dst_start..]`.
    pub fn sum_range(&mut self, src: &SampleBuffer, src_start: usize, dst_start: usize, len: usize) {
        let channels = self.active_channels.min(src.active_channels);
        for c in 0..channels {
            let dst = &mut self.channels[c][dst_start..dst_start + len];
            let s = &src.channels[c][src_start..src_start + len];
            for (d, x) in dst.iter_mut().zip(s) {
                *d += *x;
            }
        }
    }

    /// Move `len` frames from `src_start` to `dst_start` within every channel.
    pub fn copy_within(&mut self, src_start: usize, dst_start: usize, len: usize) {
        for ch in self.channels.iter_mut().take(self.active_channels) {
            ch.copy_within(src_start..src_start + len, dst_start);
        }
    }

    /// Multiply every active sample by `factor`.
    pub fn scale(&mut self, factor: Sample) {
        for ch in self.channels.iter_mut().take(self.active_channels) {
            for s in ch.iter_mut() {
                *s *= factor;
            }
        }
    }

    /// Largest absolute sample value across the active channels.
    pub fn peak(&self) -> Sample {
        let mut peak = 0.0f32;
        for ch in self.channels.iter().take(self.active_channels) {
            for s in ch {
                peak = peak.max(s.abs());
            }
        }
        peak
    }

    /// Attenuate by the peak when it exceeds unity. Quiet signals are untouched.
    pub fn normalize(&mut self) {
        let peak = self.peak();
        if peak > 1.0 {
            self.scale(1.0 / peak);
        }
    }

    /// Write the active channels as interleaved frames into `out`.
    ///
    /// `out` must hold `frames * channel_count` samples.
    pub fn interleave_into(&self, out: &mut [Sample]) {
        let channels = self.active_channels;
        debug_assert!(out.len() >= self.frames * channels);
        for (c, ch) in self.channels.iter().take(channels).enumerate() {
            for (i, s) in ch.iter().enumerate() {
                out[i * channels + c] = *s;
            }
        }
    }

    /// Write the first `frames` frames as interleaved samples into `out`.
    pub fn interleave_frames_into(&self, out: &mut [Sample], frames: usize) {
        let channels = self.active_channels;
        let frames = frames.min(self.frames);
        debug_assert!(out.len() >= frames * channels);
        for (c, ch) in self.channels.iter().take(channels).enumerate() {
            for (i, s) in ch.iter().take(frames).enumerate() {
                out[i * channels + c] = *s;
            }
        }
    }

    /// Fill the active channels from interleaved frames in `input`.
    pub fn deinterleave_from(&mut self, input: &[Sample]) {
        let channels = self.active_channels;
        let frames = (input.len() / channels).min(self.frames);
        for (c, ch) in self.channels.iter_mut().take(channels).enumerate() {
            for (i, s) in ch.iter_mut().take(frames).enumerate() {
                *s = input[i * channels + c];
            }
        }
    }

    /// Copy channel `index` into `dst`, starting at frame `start`.
    pub fn copy_from_channel(&self, dst: &mut [Sample], index: usize, start: usize) -> CoreResult<()> {
        if index >= self.active_channels {
            return Err(CoreError::ChannelOutOfRange {
                index,
                channels: self.active_channels,
            });
        }
        let src = &self.channels[index];
        let len = dst.len().min(src.len().saturating_sub(start));
        dst[..len].copy_from_slice(&src[start..start + len]);
        Ok(())
    }

    /// Copy `src` into channel `index`, starting at frame `start`.
    pub fn copy_to_channel(&mut self, src: &[Sample], index: usize, start: usize) -> CoreResult<()> {
        if index >= self.active_channels {
            return Err(CoreError::ChannelOutOfRange {
                index,
                channels: self.active_channels,
            });
        }
        let dst = &mut self.channels[index];
        let len = src.len().min(dst.len().saturating_sub(start));
        dst[start..start + len].copy_from_slice(&src[..len]);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_basic() {
        let buf = SampleBuffer::new(2, 128, 48000.0);
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.frames(), 128);
        assert!((buf.duration() - 128.0 / 48000.0).abs() < 1e-9);
    }

    #[test]
    fn test_interleave_round_trip() {
        for &channels in &[1usize, 2, 4, 5, 6] {
            let mut buf = SampleBuffer::new(channels, 16, 44100.0);
            for c in 0..channels {
                for i in 0..16 {
                    buf.channel_mut(c)[i] = (c * 100 + i) as f32;
                }
            }

            let mut interleaved = vec![0.0; 16 * channels];
            buf.interleave_into(&mut interleaved);

            let mut round = SampleBuffer::new(channels, 16, 44100.0);
            round.deinterleave_from(&interleaved);

            for c in 0..channels {
                assert_eq!(buf.channel(c), round.channel(c), "channel {c} of {channels}");
            }
        }
    }

    #[test]
    fn test_normalize_attenuates_only_clipped() {
        let mut hot = SampleBuffer::new(1, 4, 48000.0);
        hot.channel_mut(0).copy_from_slice(&[0.5, -2.0, 1.0, 0.0]);
        hot.normalize();
        assert!((hot.channel(0)[1] + 1.0).abs() < 1e-6);
        assert!((hot.channel(0)[0] - 0.25).abs() < 1e-6);

        let mut quiet = SampleBuffer::new(1, 4, 48000.0);
        quiet.channel_mut(0).copy_from_slice(&[0.1, -0.2, 0.05, 0.0]);
        quiet.normalize();
        assert!((quiet.channel(0)[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_sum_and_copy_ranges() {
        let mut a = SampleBuffer::new(1, 8, 48000.0);
        let mut b = SampleBuffer::new(1, 8, 48000.0);
        for i in 0..8 {
            b.channel_mut(0)[i] = i as f32;
        }

        a.copy_range(&b, 4, 0, 4);
        assert_eq!(&a.channel(0)[..4], &[4.0, 5.0, 6.0, 7.0]);

        a.sum_range(&b, 0, 0, 4);
        assert_eq!(&a.channel(0)[..4], &[4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_channel_io() {
        let mut buf = SampleBuffer::new(2, 8, 48000.0);
        buf.copy_to_channel(&[1.0, 2.0, 3.0], 1, 2).unwrap();

        let mut dst = [0.0; 3];
        buf.copy_from_channel(&mut dst, 1, 2).unwrap();
        assert_eq!(dst, [1.0, 2.0, 3.0]);

        assert!(buf.copy_to_channel(&[0.0], 5, 0).is_err());
    }

    #[test]
    fn test_active_channel_shrink() {
        let mut buf = SampleBuffer::with_capacity(6, 2, 16, 48000.0);
        assert_eq!(buf.channel_count(), 2);
        buf.set_channel_count(6);
        assert_eq!(buf.channel_count(), 6);
        buf.set_channel_count(1);
        assert_eq!(buf.channel_count(), 1);
    }
}
