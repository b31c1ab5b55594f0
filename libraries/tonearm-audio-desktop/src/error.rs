//! Desktop player errors
use thiserror::Error;

/// Result type for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Player errors
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Decode chain error
    #[error(transparent)]
    Audio(#[from] tonearm_audio::AudioError),

    /// Device not found
    #[error("Audio device not found")]
    DeviceNotFound,

    /// Device error
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Device cannot play the canonical format
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Failed to build output stream
    #[error("Failed to build output stream: {0}")]
    StreamBuildError(String),

    /// Failed to play stream
    #[error("Failed to play stream: {0}")]
    PlayError(String),

    /// Failed to pause stream
    #[error("Failed to pause stream: {0}")]
    PauseError(String),

    /// The shared output backend failed to start; replayed to every caller
    #[error("Audio output unavailable: {0}")]
    OutputInit(String),

    /// The transcoder program could not be found
    #[error("Transcoder not found: `{program}` is not installed or not on PATH")]
    TranscoderNotFound { program: String },

    /// The transcoder could not be started or failed while running
    #[error("Transcoder error: {0}")]
    Transcoder(String),

    /// ICY metadata could not be read
    #[error("ICY metadata error: {0}")]
    Icy(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The completion monitor thread could not be started
    #[error("Failed to start completion monitor: {0}")]
    Monitor(String),
}

impl PlayerError {
    /// Whether this error means an external tool is missing
    pub fn is_missing_tool(&self) -> bool {
        matches!(self, Self::TranscoderNotFound { .. })
    }
}

impl From<cpal::BuildStreamError> for PlayerError {
    fn from(err: cpal::BuildStreamError) -> Self {
        PlayerError::StreamBuildError(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for PlayerError {
    fn from(err: cpal::PlayStreamError) -> Self {
        PlayerError::PlayError(err.to_string())
    }
}

impl From<cpal::PauseStreamError> for PlayerError {
    fn from(err: cpal::PauseStreamError) -> Self {
        PlayerError::PauseError(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for PlayerError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        PlayerError::DeviceError(err.to_string())
    }
}

impl From<config::ConfigError> for PlayerError {
    fn from(err: config::ConfigError) -> Self {
        PlayerError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for PlayerError {
    fn from(err: reqwest::Error) -> Self {
        PlayerError::Icy(err.to_string())
    }
}
