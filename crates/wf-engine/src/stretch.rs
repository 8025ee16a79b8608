//! Time-stretch interface for pitch-corrected playback
//!
//! Buffer sources with pitch correction route their frames through a
//! `Stretcher` instead of the plain interpolating read-head. Real phase
//! vocoder implementations plug in behind this trait; the bundled fallback
//! keeps the engine self-contained by resampling (speed changes pitch).

use std::collections::VecDeque;

use wf_core::Sample;

/// Narrow contract consumed by the buffer-source nodes.
pub trait Stretcher: Send {
    /// Frames buffered before the first real output frame appears.
    fn input_latency(&self) -> usize;

    /// Frames still owed after the last input frame was pushed.
    fn output_latency(&self) -> usize;

    /// Consume `input` frames at playback `rate` and synthesize exactly
    /// `output[0].len()` frames. Channel counts of both sides match the
    /// count the stretcher was created with.
    fn process(&mut self, input: &[&[Sample]], output: &mut [&mut [Sample]], rate: f32);

    fn reset(&mut self);
}

/// Resampling fallback: correct timing, uncorrected pitch.
pub struct FallbackStretcher {
    fifo: Vec<VecDeque<Sample>>,
    position: f64,
}

impl FallbackStretcher {
    pub fn new(channel_count: usize) -> Self {
        Self {
            fifo: (0..channel_count.max(1))
                .map(|_| VecDeque::with_capacity(1024))
                .collect(),
            position: 0.0,
        }
    }
}

impl Stretcher for FallbackStretcher {
    fn input_latency(&self) -> usize {
        0
    }

    fn output_latency(&self) -> usize {
        0
    }

    fn process(&mut self, input: &[&[Sample]], output: &mut [&mut [Sample]], rate: f32) {
        let channels = self.fifo.len();
        for (c, fifo) in self.fifo.iter_mut().enumerate() {
            let src = input.get(c.min(input.len().saturating_sub(1)));
            if let Some(src) = src {
                fifo.extend(src.iter().copied());
            }
        }

        let step = rate.abs().max(f32::EPSILON) as f64;
        let frames = output.first().map(|ch| ch.len()).unwrap_or(0);
        let mut consumed = 0usize;

        for i in 0..frames {
            let pos = self.position + i as f64 * step;
            let index = pos as usize;
            let frac = (pos - index as f64) as f32;

            for c in 0..channels {
                let fifo = &self.fifo[c];
                let a = fifo.get(index).copied().unwrap_or(0.0);
                let b = fifo.get(index + 1).copied().unwrap_or(a);
                if let Some(out) = output.get_mut(c) {
                    out[i] = a + frac * (b - a);
                }
            }
            consumed = index;
        }

        // Drop fully consumed frames, carry the fractional remainder.
        self.position = (self.position + frames as f64 * step) - consumed as f64;
        for fifo in &mut self.fifo {
            for _ in 0..consumed.min(fifo.len()) {
                fifo.pop_front();
            }
        }
    }

    fn reset(&mut self) {
        for fifo in &mut self.fifo {
            fifo.clear();
        }
        self.position = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_rate_passes_through() {
        let mut stretcher = FallbackStretcher::new(1);
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; 16];

        stretcher.process(&[&input], &mut [&mut out], 1.0);
        assert_eq!(out, input);
    }

    #[test]
    fn test_double_rate_skips_every_other_frame() {
        let mut stretcher = FallbackStretcher::new(1);
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; 8];

        stretcher.process(&[&input], &mut [&mut out], 2.0);
        assert_eq!(out, [0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0]);
    }

    #[test]
    fn test_fifo_carries_across_calls() {
        let mut stretcher = FallbackStretcher::new(1);
        let first: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let second: Vec<f32> = (8..16).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; 8];

        stretcher.process(&[&first], &mut [&mut out], 1.0);
        stretcher.process(&[&second], &mut [&mut out], 1.0);
        assert_eq!(out, [8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
    }
}
