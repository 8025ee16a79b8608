//! Context clock and lifecycle state
//!
//! One atomic bundle shared between the control side and the render side:
//! the sample-frame counter (advanced only by the destination), the sample
//! rate and the context lifecycle state.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Context lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    Suspended = 0,
    Running = 1,
    Closed = 2,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ContextState::Running,
            2 => ContextState::Closed,
            _ => ContextState::Suspended,
        }
    }
}

/// Shared clock: monotonic integer sample frames, converted to seconds on read.
#[derive(Debug)]
pub struct ContextClock {
    sample_frame: AtomicU64,
    sample_rate: AtomicU32,
    state: AtomicU8,
}

impl ContextClock {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_frame: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate.to_bits()),
            state: AtomicU8::new(ContextState::Suspended as u8),
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate.load(Ordering::Acquire))
    }

    #[inline]
    pub fn nyquist_frequency(&self) -> f32 {
        self.sample_rate() / 2.0
    }

    #[inline]
    pub fn current_sample_frame(&self) -> u64 {
        self.sample_frame.load(Ordering::Acquire)
    }

    #[inline]
    pub fn current_time(&self) -> f64 {
        self.current_sample_frame() as f64 / self.sample_rate() as f64
    }

    /// Advance the frame counter after a device pull.
    #[inline]
    pub fn advance(&self, frames: u64) {
        self.sample_frame.fetch_add(frames, Ordering::AcqRel);
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition the lifecycle state. `Closed` wins over any later write.
    pub fn set_state(&self, state: ContextState) {
        if self.state() == ContextState::Closed {
            return;
        }
        self.state.store(state as u8, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let clock = ContextClock::new(48000.0);
        assert_eq!(clock.current_sample_frame(), 0);

        clock.advance(48000);
        assert_eq!(clock.current_sample_frame(), 48000);
        assert!((clock.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_is_terminal() {
        let clock = ContextClock::new(44100.0);
        clock.set_state(ContextState::Running);
        assert_eq!(clock.state(), ContextState::Running);

        clock.set_state(ContextState::Closed);
        clock.set_state(ContextState::Running);
        assert_eq!(clock.state(), ContextState::Closed);
    }
}
