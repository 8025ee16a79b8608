//! wf-audio: cpal-backed output driver for the WaveForge engine
//!
//! Implements the engine's `AudioDriver` contract on top of cpal, which
//! fronts CoreAudio, WASAPI, ALSA and JACK. The render callback runs on the
//! platform's real-time thread; everything here just plumbs it in and
//! manages stream lifecycle.

mod device;
mod driver;
mod error;

pub use device::{default_output_device_name, list_output_devices};
pub use driver::CpalDriver;
pub use error::{AudioError, AudioResult};
