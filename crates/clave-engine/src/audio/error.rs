//! Audio backend error types

use thiserror::Error;

/// Errors that can occur during audio operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio output devices available
    #[error("No audio output devices found")]
    NoOutputDevice,

    /// No audio capture devices available
    #[error("No audio capture devices found")]
    NoInputDevice,

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// The platform refused to (re)activate audio, typically because it
    /// requires a direct user gesture first. Retried on the next access
    /// request rather than treated as fatal.
    #[error("Audio context resume blocked: {0}")]
    ResumeBlocked(String),

    /// Operation on a context that has been fully closed
    #[error("Audio context is closed")]
    ContextClosed,
}

impl AudioError {
    /// Whether the failure is expected to clear on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AudioError::ResumeBlocked(_))
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AudioError::ResumeBlocked("gesture required".into()).is_retryable());
        assert!(!AudioError::NoOutputDevice.is_retryable());
        assert!(!AudioError::ContextClosed.is_retryable());
    }
}
