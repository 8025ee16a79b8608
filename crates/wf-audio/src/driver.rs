//! cpal stream wrapper implementing the engine driver contract

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};

use wf_engine::{AudioDriver, EngineError, EngineResult, RenderCallback};

use crate::device::get_output_device;
use crate::error::AudioError;

/// Output driver on top of cpal.
///
/// `open` builds the stream without starting it; `start`/`suspend`/`resume`
/// map onto cpal's play/pause. Dropping the driver tears the stream down.
pub struct CpalDriver {
    device_name: Option<String>,
    stream: Option<Stream>,
    running: bool,
}

impl CpalDriver {
    /// Driver for the default output device.
    pub fn new() -> Self {
        Self {
            device_name: None,
            stream: None,
            running: false,
        }
    }

    /// Driver bound to a named output device.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            stream: None,
            running: false,
        }
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDriver for CpalDriver {
    fn open(
        &mut self,
        sample_rate: f32,
        channel_count: usize,
        mut callback: RenderCallback,
    ) -> EngineResult<()> {
        if self.stream.is_some() {
            return Err(EngineError::InvalidState("driver already open".into()));
        }

        let device = get_output_device(self.device_name.as_deref())?;
        let config = StreamConfig {
            channels: channel_count as u16,
            sample_rate: SampleRate(sample_rate as u32),
            buffer_size: BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channel_count;
                    callback(data, frames);
                },
                |err| log::error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        log::info!(
            "opened output stream: {} Hz, {} channels on {:?}",
            sample_rate,
            channel_count,
            device.name().unwrap_or_else(|_| "<unknown>".into())
        );

        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("driver not open".into()))?;
        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        if let Some(stream) = self.stream.as_ref() {
            stream
                .pause()
                .map_err(|e| AudioError::Stream(e.to_string()))?;
        }
        self.running = false;
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.stop()
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.start()
    }

    fn cleanup(&mut self) {
        self.stream = None;
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
