//! Audio decode-chain errors
use thiserror::Error;

/// Result type alias using `AudioError`
pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio error types
#[derive(Error, Debug)]
pub enum AudioError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Unsupported format, codec profile or channel layout
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding error
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Caller-supplied buffer cannot hold a single frame
    #[error("Invalid audio buffer: {0}")]
    InvalidBuffer(String),

    /// Seek error
    #[error("Seek error: {0}")]
    SeekError(String),

    /// A decoder returned a byte count that is not a whole number of frames
    #[error("Frame misalignment: read {bytes} bytes with {frame_size}-byte frames")]
    FrameMisalignment {
        /// Bytes returned by the read
        bytes: usize,
        /// Frame size of the source
        frame_size: usize,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Symphonia error
    #[error("Symphonia error: {0}")]
    Symphonia(String),

    /// WAV container error
    #[error("WAV error: {0}")]
    Wav(String),
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        match err {
            symphonia::core::errors::Error::IoError(e) => AudioError::Io(e),
            symphonia::core::errors::Error::Unsupported(what) => {
                AudioError::UnsupportedFormat(what.to_string())
            }
            other => AudioError::Symphonia(other.to_string()),
        }
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => AudioError::Io(e),
            hound::Error::Unsupported => {
                AudioError::UnsupportedFormat("WAV sample format".to_string())
            }
            other => AudioError::Wav(other.to_string()),
        }
    }
}
