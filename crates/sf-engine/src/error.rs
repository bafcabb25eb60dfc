//! Audio engine error types

use std::path::PathBuf;

use sf_backend::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device initialization failed: {0}")]
    DeviceInit(String),

    #[error("Audio file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("Failed to attach stream to mixer: {0}")]
    MixerAttach(BackendError),

    #[error("Export write failed: {0}")]
    ExportWrite(String),

    #[error("Audio subsystem not initialized")]
    NotInitialized,

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type AudioResult<T> = Result<T, AudioError>;
