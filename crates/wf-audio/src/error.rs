//! Driver error types

use thiserror::Error;

/// Platform audio errors.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No output device available")]
    NoDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Result type alias
pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for wf_engine::EngineError {
    fn from(err: AudioError) -> Self {
        wf_engine::EngineError::Device(err.to_string())
    }
}
