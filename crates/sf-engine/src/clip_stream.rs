//! Clip stream: one decoded source bound into a mixer bus
//!
//! Owns the backend stream handle for its whole lifetime; dropping the stream
//! detaches and frees it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sf_backend::{
    AudioBackend, BackendResult, ChannelAttribute, ChannelHandle, ChannelInfo, ChannelState,
    SampleData, StreamFlags,
};

use crate::{AudioError, AudioResult};

fn describe(
    backend: &dyn AudioBackend,
    handle: ChannelHandle,
) -> BackendResult<(ChannelInfo, f32, u64)> {
    Ok((
        backend.channel_info(handle)?,
        backend.attribute(handle, ChannelAttribute::Frequency)?,
        backend.length_bytes(handle)?,
    ))
}

/// Mixer-attached decoded source with transport, volume, pan and rate state
pub struct ClipStream {
    backend: Arc<dyn AudioBackend>,
    handle: ChannelHandle,
    bus: ChannelHandle,
    path: PathBuf,
    info: ChannelInfo,
    /// Native playback frequency (speed 1.0)
    default_frequency: f32,
    duration_secs: f64,
    target_time_secs: f64,
    is_in_use: bool,
    playback_speed: f64,
    volume: f32,
    muted: bool,
    pan: f32,
}

impl ClipStream {
    /// Open `path` as a float decode stream and attach it to `bus`
    pub fn try_load(
        backend: &Arc<dyn AudioBackend>,
        path: &Path,
        bus: ChannelHandle,
    ) -> AudioResult<Self> {
        Self::try_load_with(backend, path, bus, StreamFlags::decode_float())
    }

    pub(crate) fn try_load_with(
        backend: &Arc<dyn AudioBackend>,
        path: &Path,
        bus: ChannelHandle,
        flags: StreamFlags,
    ) -> AudioResult<Self> {
        if !path.is_file() {
            log::warn!("[ClipStream] File not found: {}", path.display());
            return Err(AudioError::FileNotFound(path.to_path_buf()));
        }

        let handle = backend.create_file_stream(path, flags).map_err(|e| {
            log::warn!("[ClipStream] Failed to open {}: {}", path.display(), e);
            AudioError::Decode {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        if let Err(e) = backend.attach(bus, handle) {
            log::warn!(
                "[ClipStream] Failed to attach {} to mixer {}: {}",
                path.display(),
                bus,
                e
            );
            let _ = backend.free_channel(handle);
            return Err(AudioError::MixerAttach(e));
        }

        let (info, default_frequency, length) = match describe(backend.as_ref(), handle) {
            Ok(described) => described,
            Err(e) => {
                let _ = backend.detach(handle);
                let _ = backend.free_channel(handle);
                return Err(AudioError::Backend(e));
            }
        };

        log::debug!(
            "[ClipStream] Loaded {} as {} ({} Hz, {} ch)",
            path.display(),
            handle,
            info.sample_rate,
            info.channels
        );

        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            bus,
            path: path.to_path_buf(),
            info,
            default_frequency,
            duration_secs: info.bytes_to_seconds(length as i64),
            target_time_secs: 0.0,
            is_in_use: false,
            playback_speed: 1.0,
            volume: 1.0,
            muted: false,
            pan: 0.0,
        })
    }

    fn check(&self, result: BackendResult<()>, action: &str) {
        if let Err(e) = result {
            log::warn!(
                "[ClipStream] {} failed for {}: {}",
                action,
                self.path.display(),
                e
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> ChannelState {
        self.backend.state(self.handle)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == ChannelState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ChannelState::Paused
    }

    /// Start (or continue) playback; no-op while already playing
    pub fn play(&mut self) {
        if self.is_playing() {
            return;
        }
        self.check(self.backend.play(self.handle, false), "play");
    }

    pub fn pause(&mut self) {
        if self.is_playing() {
            self.check(self.backend.pause(self.handle), "pause");
        }
    }

    /// Continue after `pause`; no-op unless paused
    pub fn resume(&mut self) {
        if self.is_paused() {
            self.check(self.backend.play(self.handle, false), "resume");
        }
    }

    /// Stop and rewind to the start
    pub fn stop(&mut self) {
        self.check(self.backend.stop(self.handle), "stop");
        self.check(self.backend.set_position_bytes(self.handle, 0), "rewind");
    }

    /// Jump to `seconds` (clamped to the stream)
    pub fn seek(&mut self, seconds: f64) {
        let length = self.backend.length_bytes(self.handle).unwrap_or(0);
        let bytes = self.info.seconds_to_bytes(seconds).max(0) as u64;
        self.check(
            self.backend
                .set_position_bytes(self.handle, bytes.min(length)),
            "seek",
        );
    }

    pub fn position_secs(&self) -> f64 {
        self.backend
            .position_bytes(self.handle)
            .map(|bytes| self.info.bytes_to_seconds(bytes as i64))
            .unwrap_or(0.0)
    }

    /// Follow the timeline in live playback: pause outside the clip or when
    /// stopped, re-seek when drift exceeds `tolerance`, start when needed
    pub fn update_live_playback(&mut self, local_time: f64, speed: f64, tolerance: f64) {
        let inside = local_time >= 0.0 && local_time < self.duration_secs;

        if speed <= 0.0 || !inside {
            self.pause();
            // Scrubbing/reverse: hold the stream at the requested spot
            if inside && (self.position_secs() - local_time).abs() > tolerance {
                self.seek(local_time);
            }
            return;
        }

        if !self.is_playing() {
            self.seek(local_time);
            self.play();
        } else if (self.position_secs() - local_time).abs() > tolerance * speed.max(1.0) {
            self.seek(local_time);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply volume; `mute` silences without losing the stored value
    pub fn set_volume(&mut self, volume: f32, mute: bool) {
        self.volume = volume.max(0.0);
        self.muted = mute;
        let effective = if mute { 0.0 } else { self.volume };
        self.check(
            self.backend
                .set_attribute(self.handle, ChannelAttribute::Volume, effective),
            "set volume",
        );
    }

    pub fn set_panning(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
        self.check(
            self.backend
                .set_attribute(self.handle, ChannelAttribute::Pan, self.pan),
            "set panning",
        );
    }

    /// Change the playback rate; only touches the backend when the speed changed
    pub fn set_playback_speed(&mut self, speed: f64) {
        if speed == self.playback_speed {
            return;
        }
        self.playback_speed = speed;
        if speed == 0.0 {
            return;
        }
        let frequency = self.default_frequency * speed.abs() as f32;
        self.check(
            self.backend
                .set_attribute(self.handle, ChannelAttribute::Frequency, frequency),
            "set speed",
        );
    }

    /// Playback buffer length in seconds
    pub fn set_buffer_secs(&mut self, seconds: f32) {
        self.check(
            self.backend
                .set_attribute(self.handle, ChannelAttribute::Buffer, seconds),
            "set buffer",
        );
    }

    /// Peak of the left/right meter in [0, 1]; 0 without data
    pub fn get_level(&self) -> f32 {
        self.backend
            .level(self.handle)
            .map(|(left, right)| left.max(right).clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DATA
    // ═══════════════════════════════════════════════════════════════════════

    /// Consume up to `max_bytes` in the stream's native format
    pub fn read_data(&mut self, max_bytes: usize) -> AudioResult<SampleData> {
        Ok(self.backend.read_data(self.handle, max_bytes)?)
    }

    /// Most recent output frames, for analysis
    pub fn capture(&self, frames: usize) -> Option<Vec<f32>> {
        self.backend.capture(self.handle, frames)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    pub fn bus(&self) -> ChannelHandle {
        self.bus
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn target_time_secs(&self) -> f64 {
        self.target_time_secs
    }

    pub fn set_target_time(&mut self, seconds: f64) {
        self.target_time_secs = seconds;
    }

    pub fn is_in_use(&self) -> bool {
        self.is_in_use
    }

    pub fn set_in_use(&mut self, in_use: bool) {
        self.is_in_use = in_use;
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }
}

impl Drop for ClipStream {
    fn drop(&mut self) {
        let _ = self.backend.detach(self.handle);
        if let Err(e) = self.backend.free_channel(self.handle) {
            log::debug!("[ClipStream] Free {} failed: {}", self.handle, e);
        }
    }
}

impl std::fmt::Debug for ClipStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipStream")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .field("in_use", &self.is_in_use)
            .finish()
    }
}
