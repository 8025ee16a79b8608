//! wf-core: sample types, buffers and lock-free channels for WaveForge
//!
//! Everything in this crate is usable from the real-time audio thread:
//! - `SampleBuffer` - multi-channel float32 PCM block with sample-rate metadata
//! - `mix` - the speaker up/down-mix matrix and summing rules
//! - `CircularBuffer` / `OverwritingCircularBuffer` - SPSC sample rings
//! - `SpscChannel` - typed single-producer/single-consumer queue with
//!   configurable overflow and wait strategies

pub mod buffer;
pub mod error;
pub mod mix;
pub mod ringbuf;
pub mod spsc;

pub use buffer::SampleBuffer;
pub use error::{CoreError, CoreResult};
pub use mix::{ChannelCountMode, ChannelInterpretation};
pub use ringbuf::{CircularBuffer, OverwritingCircularBuffer};
pub use spsc::{
    spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, TryRecvError, TrySendError,
    WaitStrategy,
};

/// Type alias for audio samples (float32 PCM throughout the engine)
pub type Sample = f32;

/// The fixed render quantum: every node processes this many frames at a time.
pub const RENDER_QUANTUM_SIZE: usize = 128;

/// Highest channel count the mix matrix understands (5.1 layout).
pub const MAX_CHANNEL_COUNT: usize = 6;

/// Convert a time in seconds to a sample-frame index.
///
/// Rounds to the nearest frame so times expressed as `frame / rate` survive
/// the float round-trip exactly.
#[inline]
pub fn time_to_sample_frame(time: f64, sample_rate: f32) -> u64 {
    (time * sample_rate as f64).round() as u64
}

/// Convert a sample-frame index to a time in seconds.
#[inline]
pub fn sample_frame_to_time(frame: u64, sample_rate: f32) -> f64 {
    frame as f64 / sample_rate as f64
}
