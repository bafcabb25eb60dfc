//! sf-core: Shared types for the SoundFrame audio subsystem
//!
//! This crate provides the foundational types used by the backend and the
//! engine crates:
//! - Clip identities and immutable per-frame clip descriptions
//! - The transport snapshot handed to the engine once per frame
//! - 3D vectors for spatial sources
//! - Audio configuration (JSON loadable)

mod clip;
mod config;
mod error;
mod playback;
mod vector;

pub use clip::*;
pub use config::*;
pub use error::*;
pub use playback::*;
pub use vector::*;

/// Size in bytes of one 32-bit float sample
pub const F32_SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Convert a duration to a whole number of sample frames at `sample_rate`.
///
/// Rounds to the nearest frame so that durations like `0.1 s @ 48 kHz`
/// land on exactly 4800 frames despite binary float representation.
#[inline]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> i64 {
    (seconds * sample_rate as f64).round() as i64
}

/// Inverse of [`seconds_to_frames`]
#[inline]
pub fn frames_to_seconds(frames: i64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}
