//! Transport snapshot handed to the audio engine each frame

use serde::{Deserialize, Serialize};

/// Where the frequency/waveform analysis takes its input from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioSource {
    /// Analyse the primary soundtrack clip
    #[default]
    ProjectSoundtrack,
    /// Analysis is fed by an external input device (not handled here)
    ExternalDevice,
}

/// Playback state for one frame.
///
/// While exporting, `time_in_secs` is the authoritative render clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Playback {
    /// Timeline position (seconds)
    pub time_in_secs: f64,
    /// Transport rate, 0 = stopped, negative = reverse
    pub playback_speed: f64,
    /// Frame-locked export is in progress
    pub is_rendering_to_file: bool,
    /// Audio playback/analysis enabled
    pub audio_enabled: bool,
    /// Analysis input
    pub source: AudioSource,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            time_in_secs: 0.0,
            playback_speed: 1.0,
            is_rendering_to_file: false,
            audio_enabled: true,
            source: AudioSource::ProjectSoundtrack,
        }
    }
}

impl Playback {
    /// Live playback at `time_in_secs` with normal speed
    pub fn at(time_in_secs: f64) -> Self {
        Self {
            time_in_secs,
            ..Default::default()
        }
    }

    /// Export frame at render clock `time_in_secs`
    pub fn rendering(time_in_secs: f64) -> Self {
        Self {
            time_in_secs,
            is_rendering_to_file: true,
            ..Default::default()
        }
    }

    pub fn with_speed(mut self, playback_speed: f64) -> Self {
        self.playback_speed = playback_speed;
        self
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playback_speed != 0.0
    }

    /// Analysis runs against the project soundtrack this frame
    #[inline]
    pub fn captures_soundtrack(&self) -> bool {
        self.audio_enabled && self.source == AudioSource::ProjectSoundtrack
    }
}
