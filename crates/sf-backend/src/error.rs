//! Backend error codes

use thiserror::Error;

use crate::ChannelHandle;

/// Last-error style failures reported by an [`AudioBackend`](crate::AudioBackend)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Audio device not initialized")]
    NotInitialized,

    #[error("Audio device already initialized")]
    AlreadyInitialized,

    #[error("Invalid handle: {0}")]
    InvalidHandle(ChannelHandle),

    #[error("Failed to open file: {0}")]
    FileOpen(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Channel {0} is not a mixer")]
    NotAMixer(ChannelHandle),

    #[error("Channel {0} is already attached to a mixer")]
    AlreadyAttached(ChannelHandle),

    #[error("Invalid position {position} for channel {channel}")]
    Position { channel: ChannelHandle, position: u64 },

    #[error("Device error: {0}")]
    Device(String),
}

/// Result type alias
pub type BackendResult<T> = Result<T, BackendError>;
