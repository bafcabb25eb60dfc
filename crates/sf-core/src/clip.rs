//! Clip identity and per-frame clip description

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Stable key for one logical audio clip instance.
///
/// The same logical source must produce the same identity every frame;
/// the engine uses it as the key of its active stream table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClipIdentity {
    /// Timeline clip, keyed by its resource handle
    Resource(u64),
    /// Sound requested by an operator for a specific file
    Operator { operator_id: u64, path: String },
}

impl ClipIdentity {
    pub fn resource(handle: u64) -> Self {
        Self::Resource(handle)
    }

    pub fn operator(operator_id: u64, path: impl Into<String>) -> Self {
        Self::Operator {
            operator_id,
            path: path.into(),
        }
    }
}

impl fmt::Display for ClipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipIdentity::Resource(handle) => write!(f, "clip#{}", handle),
            ClipIdentity::Operator { operator_id, path } => {
                write!(f, "op#{}:{}", operator_id, path)
            }
        }
    }
}

/// Immutable-per-frame description of an audio clip.
///
/// Owned by the timeline layer; the audio core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipResource {
    /// Identity of the clip instance
    pub id: ClipIdentity,
    /// Audio file (absolute, or relative to the configured resource root)
    pub file_path: PathBuf,
    /// Timeline position of the clip start (seconds)
    #[serde(default)]
    pub start_time: f64,
    /// Clip length (seconds)
    pub length: f64,
    /// Linear gain (>= 0)
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Clip belongs to the project soundtrack
    #[serde(default)]
    pub is_soundtrack: bool,
    /// Stream may be torn down as soon as the clip is unused for a frame
    #[serde(default)]
    pub discard_after_use: bool,
}

fn default_volume() -> f32 {
    1.0
}

impl ClipResource {
    /// Create a clip description starting at timeline zero
    pub fn new(id: ClipIdentity, file_path: impl Into<PathBuf>, length: f64) -> Self {
        Self {
            id,
            file_path: file_path.into(),
            start_time: 0.0,
            length,
            volume: 1.0,
            is_soundtrack: false,
            discard_after_use: false,
        }
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.max(0.0);
        self
    }

    pub fn soundtrack(mut self) -> Self {
        self.is_soundtrack = true;
        self
    }

    pub fn discard_after_use(mut self) -> Self {
        self.discard_after_use = true;
        self
    }

    /// Timeline position of the clip end
    #[inline]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.length
    }

    /// Convert a timeline position into clip-local time (may be negative)
    #[inline]
    pub fn local_time(&self, timeline_time: f64) -> f64 {
        timeline_time - self.start_time
    }

    /// Whether a clip-local time falls inside `[0, length]`
    #[inline]
    pub fn contains_local_time(&self, local_time: f64) -> bool {
        local_time >= 0.0 && local_time <= self.length
    }

    /// Resolve the file path against an optional resource root
    pub fn resolve_path(&self, resource_root: Option<&Path>) -> PathBuf {
        match resource_root {
            Some(root) if self.file_path.is_relative() => root.join(&self.file_path),
            _ => self.file_path.clone(),
        }
    }
}
