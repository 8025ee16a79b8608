//! Platform audio driver contract
//!
//! The engine does not open devices itself: it hands a driver a render
//! callback that must be invoked from the device's real-time thread with an
//! interleaved float32 output buffer. `wf-audio` provides the cpal-backed
//! implementation; tests and offline rendering bypass drivers entirely.

use crate::error::EngineResult;

/// Callback invoked from the device's real-time thread. Must fill exactly
/// `frames` interleaved frames within the device period.
pub type RenderCallback = Box<dyn FnMut(&mut [f32], usize) + Send>;

/// Platform output driver consumed by [`crate::context::AudioContext`].
///
/// Not `Send`: platform stream handles (cpal's included) are tied to the
/// thread that opened them. The context that owns the driver stays on its
/// creation thread; only the render callback crosses into the device thread.
pub trait AudioDriver {
    /// Open an output stream. The callback is moved into the device thread.
    fn open(
        &mut self,
        sample_rate: f32,
        channel_count: usize,
        callback: RenderCallback,
    ) -> EngineResult<()>;

    fn start(&mut self) -> EngineResult<()>;
    fn stop(&mut self) -> EngineResult<()>;
    fn suspend(&mut self) -> EngineResult<()>;
    fn resume(&mut self) -> EngineResult<()>;

    /// Tear the stream down. Idempotent.
    fn cleanup(&mut self);

    fn is_running(&self) -> bool;
}
