//! Error types for the farm assistant voice system

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice orchestration system
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// The platform has no speech recognition capability at all.
    #[error("Speech capture unavailable on this platform")]
    CaptureUnavailable,

    #[error("Speech capture error: {0}")]
    Capture(String),

    #[error("Query submission failed: {0}")]
    Submission(String),

    /// Transient status-call failure. Retried by the poller, never shown to the user.
    #[error("Result polling error: {0}")]
    Polling(String),

    #[error("Result polling timed out after {attempts} attempts")]
    PollingTimeout { attempts: u32 },

    #[error("Speech playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl VoiceError {
    /// Which apology (if any) this failure should produce.
    pub fn kind(&self) -> FailureKind {
        match self {
            VoiceError::CaptureUnavailable => FailureKind::CaptureUnavailable,
            VoiceError::Capture(_) => FailureKind::Capture,
            VoiceError::Submission(_) | VoiceError::Http(_) => FailureKind::Submission,
            VoiceError::Polling(_) => FailureKind::Polling,
            VoiceError::PollingTimeout { .. } => FailureKind::PollingTimeout,
            VoiceError::Playback(_) => FailureKind::Playback,
            VoiceError::Config(_) | VoiceError::ChannelSend(_) => FailureKind::Internal,
        }
    }
}

/// Coarse failure category, used to choose the spoken apology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CaptureUnavailable,
    Capture,
    Submission,
    Polling,
    PollingTimeout,
    Playback,
    Internal,
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Http(err.to_string())
    }
}
