//! Backend capability trait and the value types crossing it

use std::fmt;
use std::path::Path;

use sf_core::Vec3;

use crate::BackendResult;

// ═══════════════════════════════════════════════════════════════════════════
// HANDLES & CHANNEL DESCRIPTION
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle of a backend channel (file stream or mixer node)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub u32);

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sample format delivered by `read_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 32-bit float
    #[default]
    F32,
    /// 16-bit signed integer
    I16,
}

impl SampleFormat {
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::I16 => 2,
        }
    }
}

/// Static description of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Pulled by a mixer or read directly, never drives the device itself
    pub decode_only: bool,
    pub is_mixer: bool,
}

impl ChannelInfo {
    /// Bytes per interleaved sample frame
    #[inline]
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Convert seconds to a byte offset, keeping the sign (negative = pre-roll)
    #[inline]
    pub fn seconds_to_bytes(&self, seconds: f64) -> i64 {
        sf_core::seconds_to_frames(seconds, self.sample_rate) * self.block_align() as i64
    }

    #[inline]
    pub fn bytes_to_seconds(&self, bytes: i64) -> f64 {
        let align = self.block_align().max(1) as i64;
        sf_core::frames_to_seconds(bytes / align, self.sample_rate)
    }
}

/// Transport state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Flags for file stream creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags {
    /// Stream is pulled by a mixer or read directly
    pub decode_only: bool,
    /// Deliver 32-bit float samples instead of 16-bit integers
    pub float_samples: bool,
    /// Stream takes part in 3D positioning
    pub spatial: bool,
}

impl StreamFlags {
    /// Float decode stream, the format used by every engine stream
    pub fn decode_float() -> Self {
        Self {
            decode_only: true,
            float_samples: true,
            spatial: false,
        }
    }

    pub fn with_spatial(mut self) -> Self {
        self.spatial = true;
        self
    }
}

/// Per-channel attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelAttribute {
    /// Linear gain
    Volume,
    /// -1 (left) .. 1 (right)
    Pan,
    /// Playback sample rate in Hz (rate changes speed and pitch)
    Frequency,
    /// Playback buffer length in seconds
    Buffer,
}

/// Process-wide backend options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalOption {
    /// Number of background update threads (0 = updates driven by `update`)
    UpdateThreads,
    /// Background update period in milliseconds
    UpdatePeriodMs,
    /// Gain applied to every file stream
    GlobalStreamVolume,
}

// ═══════════════════════════════════════════════════════════════════════════
// SAMPLE DATA
// ═══════════════════════════════════════════════════════════════════════════

/// Interleaved samples in the channel's native format
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl SampleData {
    pub fn empty(format: SampleFormat) -> Self {
        match format {
            SampleFormat::F32 => SampleData::F32(Vec::new()),
            SampleFormat::I16 => SampleData::I16(Vec::new()),
        }
    }

    /// Convert float samples to the requested format
    pub fn from_f32(samples: Vec<f32>, format: SampleFormat) -> Self {
        match format {
            SampleFormat::F32 => SampleData::F32(samples),
            SampleFormat::I16 => SampleData::I16(
                samples
                    .iter()
                    .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect(),
            ),
        }
    }

    /// Number of samples (not frames)
    pub fn len(&self) -> usize {
        match self {
            SampleData::F32(s) => s.len(),
            SampleData::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        match self {
            SampleData::F32(s) => s.len() * 4,
            SampleData::I16(s) => s.len() * 2,
        }
    }

    /// Raw native-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SampleData::F32(s) => bytemuck::cast_slice(s),
            SampleData::I16(s) => bytemuck::cast_slice(s),
        }
    }

    /// Normalized float view
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            SampleData::F32(s) => s.clone(),
            SampleData::I16(s) => s.iter().map(|&v| v as f32 / 32768.0).collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 3D
// ═══════════════════════════════════════════════════════════════════════════

/// How a spatial channel's position is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode3d {
    /// World coordinates
    #[default]
    Normal,
    /// Relative to the listener
    Relative,
    /// 3D processing disabled
    Off,
}

/// Distance and cone attributes of a spatial channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attributes3d {
    pub mode: Mode3d,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Inside cone angle in degrees (360 = omnidirectional)
    pub inner_angle: f32,
    /// Outside cone angle in degrees
    pub outer_angle: f32,
    /// Gain outside the outer cone
    pub outer_volume: f32,
}

impl Default for Attributes3d {
    fn default() -> Self {
        Self {
            mode: Mode3d::Normal,
            min_distance: 1.0,
            max_distance: 100.0,
            inner_angle: 360.0,
            outer_angle: 360.0,
            outer_volume: 1.0,
        }
    }
}

/// Position, facing and velocity of a spatial channel
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position3d {
    pub position: Vec3,
    pub orientation: Vec3,
    pub velocity: Vec3,
}

/// Listener placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener3d {
    pub position: Vec3,
    pub velocity: Vec3,
    pub front: Vec3,
    pub top: Vec3,
}

impl Default for Listener3d {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            front: Vec3::FORWARD,
            top: Vec3::UP,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Native audio backend: device, streams, mixer nodes and 3D positioning.
///
/// All calls are synchronous and bounded. Failures are reported through
/// [`BackendError`](crate::BackendError), never by panicking.
pub trait AudioBackend: Send + Sync {
    // ── device ──
    fn is_device_initialized(&self) -> bool;
    fn init_device(&self, sample_rate: u32, channels: u16) -> BackendResult<()>;
    fn free_device(&self) -> BackendResult<()>;
    fn option(&self, option: GlobalOption) -> f64;
    fn set_option(&self, option: GlobalOption, value: f64) -> BackendResult<()>;
    /// Render one update period of every started device-facing mixer
    fn update(&self, period_ms: u32) -> BackendResult<()>;

    // ── channels ──
    fn create_mixer(
        &self,
        sample_rate: u32,
        channels: u16,
        decode_only: bool,
    ) -> BackendResult<ChannelHandle>;
    fn create_file_stream(&self, path: &Path, flags: StreamFlags) -> BackendResult<ChannelHandle>;
    fn attach(&self, mixer: ChannelHandle, channel: ChannelHandle) -> BackendResult<()>;
    fn detach(&self, channel: ChannelHandle) -> BackendResult<()>;
    fn free_channel(&self, channel: ChannelHandle) -> BackendResult<()>;
    fn channel_info(&self, channel: ChannelHandle) -> BackendResult<ChannelInfo>;

    // ── transport ──
    fn length_bytes(&self, channel: ChannelHandle) -> BackendResult<u64>;
    fn position_bytes(&self, channel: ChannelHandle) -> BackendResult<u64>;
    fn set_position_bytes(&self, channel: ChannelHandle, position: u64) -> BackendResult<()>;
    fn play(&self, channel: ChannelHandle, restart: bool) -> BackendResult<()>;
    fn pause(&self, channel: ChannelHandle) -> BackendResult<()>;
    fn stop(&self, channel: ChannelHandle) -> BackendResult<()>;
    /// Unknown handles report `Stopped`
    fn state(&self, channel: ChannelHandle) -> ChannelState;

    // ── attributes & data ──
    fn attribute(&self, channel: ChannelHandle, attribute: ChannelAttribute) -> BackendResult<f32>;
    fn set_attribute(
        &self,
        channel: ChannelHandle,
        attribute: ChannelAttribute,
        value: f32,
    ) -> BackendResult<()>;
    /// Consume up to `max_bytes` of sample data in the channel's native format
    fn read_data(&self, channel: ChannelHandle, max_bytes: usize) -> BackendResult<SampleData>;
    /// Peak meter of the last rendered block (left, right), `None` if nothing was rendered
    fn level(&self, channel: ChannelHandle) -> Option<(f32, f32)>;
    /// Non-consuming copy of the most recent `frames` interleaved float frames
    fn capture(&self, channel: ChannelHandle, frames: usize) -> Option<Vec<f32>>;

    // ── 3D ──
    fn set_3d_attributes(&self, channel: ChannelHandle, attributes: &Attributes3d)
    -> BackendResult<()>;
    fn set_3d_position(&self, channel: ChannelHandle, position: &Position3d) -> BackendResult<()>;
    fn set_listener(&self, listener: &Listener3d) -> BackendResult<()>;
    /// Commit pending 3D changes
    fn apply_3d(&self);
}
