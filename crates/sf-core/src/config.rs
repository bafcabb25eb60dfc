//! Audio subsystem configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Audio subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Mixer (and export) sample rate in Hz
    pub mixer_sample_rate: u32,

    /// Mixer channel count (export buffers are interleaved with this count)
    pub mixer_channels: u16,

    /// Device buffer length restored after export (seconds)
    pub device_buffer_secs: f32,

    /// Background update period of the backend (milliseconds)
    pub update_period_ms: u32,

    /// Background update threads of the backend (0 = manual updates)
    pub update_threads: u32,

    /// Frame rate used to derive spatial velocity (Doppler approximation)
    pub assumed_frame_rate: f32,

    /// Drift between stream and timeline before live playback re-seeks (seconds)
    pub sync_tolerance_secs: f64,

    /// FFT window size (power of 2)
    pub fft_size: usize,

    /// Number of samples kept for the waveform display
    pub waveform_size: usize,

    /// Base directory for relative clip paths
    pub resource_root: Option<PathBuf>,

    /// Gain applied to all streams
    pub global_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mixer_sample_rate: 48000,
            mixer_channels: 2,
            device_buffer_secs: 0.1,
            update_period_ms: 10,
            update_threads: 1,
            assumed_frame_rate: 60.0,
            sync_tolerance_secs: 0.05,
            fft_size: 1024,
            waveform_size: 512,
            resource_root: None,
            global_volume: 1.0,
        }
    }
}

impl AudioConfig {
    /// Headless configuration: no background updates, everything frame-driven
    pub fn headless() -> Self {
        Self {
            update_threads: 0,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::info!("[AudioConfig] Loaded {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.mixer_sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.mixer_channels = channels;
        self
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = Some(root.into());
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mixer_sample_rate == 0 {
            return Err(ConfigError::Invalid("mixer_sample_rate must be > 0".into()));
        }
        if self.mixer_channels == 0 {
            return Err(ConfigError::Invalid("mixer_channels must be > 0".into()));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(ConfigError::Invalid(format!(
                "fft_size must be a power of two >= 32, got {}",
                self.fft_size
            )));
        }
        if self.assumed_frame_rate <= 0.0 {
            return Err(ConfigError::Invalid("assumed_frame_rate must be > 0".into()));
        }
        if self.global_volume < 0.0 {
            return Err(ConfigError::Invalid("global_volume must be >= 0".into()));
        }
        Ok(())
    }

    /// Bytes per interleaved f32 mixer frame
    #[inline]
    pub fn mixer_frame_bytes(&self) -> usize {
        self.mixer_channels as usize * crate::F32_SAMPLE_BYTES
    }
}
