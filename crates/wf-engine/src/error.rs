//! Engine error types

use thiserror::Error;

/// Errors surfaced by control-thread APIs.
///
/// The audio thread never raises these; a failing node renders silence and
/// at most emits an event.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Decoder error: {0}")]
    Decoder(String),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
