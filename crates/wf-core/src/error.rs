//! Error types shared by the core primitives

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Channel index {index} out of range for {channels} channels")]
    ChannelOutOfRange { index: usize, channels: usize },

    #[error("Buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Channel is full")]
    ChannelFull,

    #[error("Channel is empty")]
    ChannelEmpty,

    #[error("Channel disconnected")]
    ChannelDisconnected,
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
