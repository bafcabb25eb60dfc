//! Software Backend - pure-Rust implementation of [`AudioBackend`]
//!
//! - File streams are decoded up front (symphonia) and shared through a cache
//! - Mixer nodes sum their playing inputs when pulled
//! - Decode-only channels are pulled by a parent mixer or read directly
//! - Device-facing mixers are rendered by `update()`, either by the host or by
//!   a background updater thread
//! - Distance/cone attenuation for spatial streams

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
    Attributes3d, AudioBackend, BackendError, BackendResult, ChannelAttribute, ChannelHandle,
    ChannelInfo, ChannelState, DecodeCache, DecodedAudio, GlobalOption, Listener3d, Mode3d,
    Position3d, SampleData, SampleFormat, StreamFlags,
};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Where the device-facing mix goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Rendered and discarded (headless, tests, offline tools)
    #[default]
    Null,
    /// Default output device via cpal (`device-output` feature)
    Device,
}

/// Software backend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareBackendConfig {
    pub output: OutputMode,
    /// Spawn a background updater while the device is initialized
    pub automatic_updates: bool,
    /// Device ring capacity in frames
    pub device_ring_frames: usize,
}

impl Default for SoftwareBackendConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::Null,
            automatic_updates: false,
            device_ring_frames: 48000 / 2,
        }
    }
}

impl SoftwareBackendConfig {
    /// Real-time playback to the default device
    pub fn realtime() -> Self {
        Self {
            output: OutputMode::Device,
            automatic_updates: true,
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHANNEL STATE
// ═══════════════════════════════════════════════════════════════════════════

enum ChannelKind {
    Stream {
        audio: Arc<DecodedAudio>,
        /// File the audio was decoded from (cache key)
        source: PathBuf,
        /// Fractional read position in source frames
        cursor: f64,
    },
    Mixer {
        inputs: Vec<ChannelHandle>,
    },
}

struct SpatialState {
    attributes: Attributes3d,
    position: Position3d,
    /// Gain computed at the last `apply_3d`
    gain: f32,
}

impl SpatialState {
    fn new() -> Self {
        Self {
            attributes: Attributes3d::default(),
            position: Position3d::default(),
            gain: 1.0,
        }
    }

    fn compute_gain(&self, listener: &Listener3d) -> f32 {
        let attrs = &self.attributes;
        if attrs.mode == Mode3d::Off {
            return 1.0;
        }

        let offset = match attrs.mode {
            Mode3d::Relative => self.position.position,
            _ => self.position.position - listener.position,
        };

        let min = attrs.min_distance.max(f32::EPSILON);
        let distance = offset.length().clamp(min, attrs.max_distance.max(min));
        let mut gain = min / distance;

        if attrs.inner_angle < 360.0 {
            let facing = self.position.orientation.normalize();
            let to_listener = (-offset).normalize();
            let angle = facing.dot(&to_listener).clamp(-1.0, 1.0).acos().to_degrees() * 2.0;
            let cone = if angle <= attrs.inner_angle {
                1.0
            } else if angle >= attrs.outer_angle {
                attrs.outer_volume
            } else {
                let span = (attrs.outer_angle - attrs.inner_angle).max(f32::EPSILON);
                let t = (angle - attrs.inner_angle) / span;
                1.0 + (attrs.outer_volume - 1.0) * t
            };
            gain *= cone;
        }

        gain
    }
}

struct Channel {
    kind: ChannelKind,
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    decode_only: bool,
    state: ChannelState,
    volume: f32,
    pan: f32,
    frequency: f32,
    buffer_secs: f32,
    parent: Option<ChannelHandle>,
    spatial: Option<SpatialState>,
    last_output: Vec<f32>,
    peak: Option<(f32, f32)>,
}

impl Channel {
    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
            decode_only: self.decode_only,
            is_mixer: matches!(self.kind, ChannelKind::Mixer { .. }),
        }
    }

    /// Remember the block for `level()` / `capture()`
    fn note_output(&mut self, block: &[f32]) {
        let channels = self.channels.max(1) as usize;
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for frame in block.chunks(channels) {
            left = left.max(frame[0].abs());
            right = right.max(frame.get(1).copied().unwrap_or(frame[0]).abs());
        }
        self.peak = if block.is_empty() {
            None
        } else {
            Some((left, right))
        };
        self.last_output.clear();
        self.last_output.extend_from_slice(block);
    }
}

/// Pull `frames` frames from decoded audio, advancing `cursor` by `step` per frame.
///
/// Returns fewer frames when the end of the data is reached.
fn pull_frames(audio: &DecodedAudio, cursor: &mut f64, frames: usize, step: f64) -> Vec<f32> {
    let channels = audio.channels as usize;
    let total = audio.frames();
    let mut out = Vec::with_capacity(frames * channels);

    for _ in 0..frames {
        let index = cursor.floor() as usize;
        if *cursor < 0.0 || index >= total {
            break;
        }
        let next = (index + 1).min(total - 1);
        let frac = (*cursor - index as f64) as f32;
        for ch in 0..channels {
            let a = audio.samples[index * channels + ch];
            let b = audio.samples[next * channels + ch];
            out.push(a * (1.0 - frac) + b * frac);
        }
        *cursor += step;
    }

    out
}

/// Map interleaved frames between channel counts (extra output channels repeat the last input channel)
fn remap_channels(block: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 {
        return block.to_vec();
    }
    let frames = block.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in block.chunks(from) {
        for ch in 0..to {
            out.push(frame[ch.min(from - 1)]);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// MIX STATE (guarded by one mutex)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct DeviceFormat {
    sample_rate: u32,
    channels: u16,
}

struct MixState {
    device: Option<DeviceFormat>,
    next_handle: u32,
    channels: HashMap<ChannelHandle, Channel>,
    update_threads: u32,
    update_period_ms: u32,
    global_volume: f32,
    listener: Listener3d,
}

impl MixState {
    fn new() -> Self {
        Self {
            device: None,
            next_handle: 1,
            channels: HashMap::new(),
            update_threads: 1,
            update_period_ms: 10,
            global_volume: 1.0,
            listener: Listener3d::default(),
        }
    }

    fn channel(&self, handle: ChannelHandle) -> BackendResult<&Channel> {
        self.channels
            .get(&handle)
            .ok_or(BackendError::InvalidHandle(handle))
    }

    fn channel_mut(&mut self, handle: ChannelHandle) -> BackendResult<&mut Channel> {
        self.channels
            .get_mut(&handle)
            .ok_or(BackendError::InvalidHandle(handle))
    }

    fn require_device(&self) -> BackendResult<DeviceFormat> {
        self.device.ok_or(BackendError::NotInitialized)
    }

    fn allocate(&mut self, channel: Channel) -> ChannelHandle {
        let handle = ChannelHandle(self.next_handle);
        self.next_handle += 1;
        self.channels.insert(handle, channel);
        handle
    }

    fn detach(&mut self, handle: ChannelHandle) {
        let parent = match self.channels.get_mut(&handle) {
            Some(channel) => channel.parent.take(),
            None => return,
        };
        let Some(parent) = parent else {
            return;
        };
        if let Some(Channel {
            kind: ChannelKind::Mixer { inputs },
            ..
        }) = self.channels.get_mut(&parent)
        {
            inputs.retain(|&h| h != handle);
        }
    }

    /// Render `frames` frames of a mixer at its own rate and channel count
    fn render_mixer(&mut self, handle: ChannelHandle, frames: usize) -> BackendResult<Vec<f32>> {
        let (inputs, rate, channels) = match self.channel(handle)? {
            Channel {
                kind: ChannelKind::Mixer { inputs },
                sample_rate,
                channels,
                ..
            } => (inputs.clone(), *sample_rate, *channels as usize),
            _ => return Err(BackendError::NotAMixer(handle)),
        };

        let mut mix = vec![0.0f32; frames * channels];
        for input in inputs {
            if let Some(block) = self.render_input(input, frames, rate, channels)? {
                for (out, s) in mix.iter_mut().zip(block.iter()) {
                    *out += *s;
                }
            }
        }

        let mixer = self.channel_mut(handle)?;
        if mixer.volume != 1.0 {
            for s in &mut mix {
                *s *= mixer.volume;
            }
        }
        mixer.note_output(&mix);
        Ok(mix)
    }

    /// Render one mixer input converted to the parent's rate and channel count
    fn render_input(
        &mut self,
        handle: ChannelHandle,
        frames: usize,
        out_rate: u32,
        out_channels: usize,
    ) -> BackendResult<Option<Vec<f32>>> {
        let (is_mixer, state, channels) = {
            let channel = self.channel(handle)?;
            (
                matches!(channel.kind, ChannelKind::Mixer { .. }),
                channel.state,
                channel.channels as usize,
            )
        };

        // Decode-only sub-mixers are pulled whenever their parent renders
        if is_mixer {
            let block = self.render_mixer(handle, frames)?;
            return Ok(Some(remap_channels(&block, channels, out_channels)));
        }

        if state != ChannelState::Playing {
            return Ok(None);
        }

        let global_volume = self.global_volume;
        let channel = self.channel_mut(handle)?;
        let step = channel.frequency as f64 / out_rate.max(1) as f64;
        let gain = channel.volume
            * global_volume
            * channel.spatial.as_ref().map(|s| s.gain).unwrap_or(1.0);
        let pan = channel.pan;

        let ChannelKind::Stream { audio, cursor, .. } = &mut channel.kind else {
            return Ok(None);
        };
        let mut block = pull_frames(audio, cursor, frames, step);
        let produced = block.len() / channels.max(1);
        channel.note_output(&block);

        if produced < frames {
            channel.state = ChannelState::Stopped;
            block.resize(frames * channels, 0.0);
        }

        let mut block = remap_channels(&block, channels, out_channels);
        for frame in block.chunks_mut(out_channels) {
            for (ch, s) in frame.iter_mut().enumerate() {
                let pan_gain = match (out_channels, ch) {
                    (2, 0) => (1.0 - pan).min(1.0),
                    (2, 1) => (1.0 + pan).min(1.0),
                    _ => 1.0,
                };
                *s *= gain * pan_gain;
            }
        }

        Ok(Some(block))
    }

    /// Render every started device-facing mixer for one update period
    fn update(&mut self, period_ms: u32) -> BackendResult<Vec<f32>> {
        let device = self.require_device()?;
        let frames = (device.sample_rate as u64 * period_ms as u64 / 1000) as usize;

        let started: Vec<ChannelHandle> = self
            .channels
            .iter()
            .filter(|(_, c)| {
                !c.decode_only
                    && c.state == ChannelState::Playing
                    && matches!(c.kind, ChannelKind::Mixer { .. })
            })
            .map(|(h, _)| *h)
            .collect();

        let mut output = vec![0.0f32; frames * device.channels as usize];
        for handle in started {
            let channels = self.channel(handle)?.channels as usize;
            let block = self.render_mixer(handle, frames)?;
            let block = remap_channels(&block, channels, device.channels as usize);
            for (out, s) in output.iter_mut().zip(block.iter()) {
                *out += *s;
            }
        }
        Ok(output)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SOFTWARE BACKEND
// ═══════════════════════════════════════════════════════════════════════════

struct Shared {
    state: Mutex<MixState>,
    cache: DecodeCache,
    #[cfg(feature = "device-output")]
    device_tx: Mutex<Option<rtrb::Producer<f32>>>,
}

impl Shared {
    fn update(&self, period_ms: u32) -> BackendResult<()> {
        let block = self.state.lock().update(period_ms)?;
        self.push_to_device(&block);
        Ok(())
    }

    #[cfg(feature = "device-output")]
    fn push_to_device(&self, block: &[f32]) {
        if let Some(tx) = self.device_tx.lock().as_mut() {
            for &s in block {
                // Device ring full: drop the rest of the block
                if tx.push(s).is_err() {
                    break;
                }
            }
        }
    }

    #[cfg(not(feature = "device-output"))]
    fn push_to_device(&self, _block: &[f32]) {}
}

struct Updater {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Workers {
    updater: Option<Updater>,
    #[cfg(feature = "device-output")]
    device: Option<crate::device::DeviceOutput>,
}

/// Pure-Rust audio backend
pub struct SoftwareBackend {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
    config: SoftwareBackendConfig,
}

impl SoftwareBackend {
    pub fn new(config: SoftwareBackendConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MixState::new()),
                cache: DecodeCache::new(),
                #[cfg(feature = "device-output")]
                device_tx: Mutex::new(None),
            }),
            workers: Mutex::new(Workers::default()),
            config,
        }
    }

    /// Headless backend with manual updates
    pub fn headless() -> Self {
        Self::new(SoftwareBackendConfig::default())
    }

    pub fn config(&self) -> &SoftwareBackendConfig {
        &self.config
    }

    /// Decoded-audio cache (prime it to open streams without touching disk)
    pub fn cache(&self) -> &DecodeCache {
        &self.shared.cache
    }

    /// Number of live channels (streams + mixers)
    pub fn channel_count(&self) -> usize {
        self.shared.state.lock().channels.len()
    }

    fn start_workers(&self, format: DeviceFormat) -> BackendResult<()> {
        let mut workers = self.workers.lock();

        if self.config.output == OutputMode::Device {
            #[cfg(feature = "device-output")]
            {
                let capacity = self.config.device_ring_frames * format.channels as usize;
                let (output, tx) =
                    crate::device::DeviceOutput::start(format.sample_rate, format.channels, capacity)?;
                *self.shared.device_tx.lock() = Some(tx);
                workers.device = Some(output);
            }
            #[cfg(not(feature = "device-output"))]
            log::warn!(
                "[SoftwareBackend] Built without device-output, rendering {} Hz to null output",
                format.sample_rate
            );
        }

        if self.config.automatic_updates {
            let stop = Arc::new(AtomicBool::new(false));
            let shared = Arc::clone(&self.shared);
            let stop_flag = Arc::clone(&stop);
            let handle = thread::spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    let (threads, period) = {
                        let state = shared.state.lock();
                        (state.update_threads, state.update_period_ms.max(1))
                    };
                    thread::sleep(Duration::from_millis(period as u64));
                    if threads == 0 {
                        continue;
                    }
                    if let Err(e) = shared.update(period) {
                        log::debug!("[SoftwareBackend] Update skipped: {}", e);
                    }
                }
            });
            workers.updater = Some(Updater { stop, handle });
        }

        Ok(())
    }

    fn stop_workers(&self) {
        let mut workers = self.workers.lock();
        if let Some(updater) = workers.updater.take() {
            updater.stop.store(true, Ordering::Release);
            let _ = updater.handle.join();
        }
        #[cfg(feature = "device-output")]
        {
            *self.shared.device_tx.lock() = None;
            if let Some(mut device) = workers.device.take() {
                device.stop();
            }
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::headless()
    }
}

impl Drop for SoftwareBackend {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

impl AudioBackend for SoftwareBackend {
    fn is_device_initialized(&self) -> bool {
        self.shared.state.lock().device.is_some()
    }

    fn init_device(&self, sample_rate: u32, channels: u16) -> BackendResult<()> {
        if sample_rate == 0 || channels == 0 {
            return Err(BackendError::Device(format!(
                "invalid device format {} Hz / {} ch",
                sample_rate, channels
            )));
        }
        let format = DeviceFormat {
            sample_rate,
            channels,
        };
        {
            let mut state = self.shared.state.lock();
            if state.device.is_some() {
                return Err(BackendError::AlreadyInitialized);
            }
            state.device = Some(format);
        }

        if let Err(e) = self.start_workers(format) {
            self.stop_workers();
            self.shared.state.lock().device = None;
            return Err(e);
        }

        log::info!(
            "[SoftwareBackend] Device initialized: {} Hz, {} channels",
            sample_rate,
            channels
        );
        Ok(())
    }

    fn free_device(&self) -> BackendResult<()> {
        if !self.is_device_initialized() {
            return Err(BackendError::NotInitialized);
        }
        self.stop_workers();

        let mut state = self.shared.state.lock();
        state.channels.clear();
        state.device = None;
        log::info!("[SoftwareBackend] Device freed");
        Ok(())
    }

    fn option(&self, option: GlobalOption) -> f64 {
        let state = self.shared.state.lock();
        match option {
            GlobalOption::UpdateThreads => state.update_threads as f64,
            GlobalOption::UpdatePeriodMs => state.update_period_ms as f64,
            GlobalOption::GlobalStreamVolume => state.global_volume as f64,
        }
    }

    fn set_option(&self, option: GlobalOption, value: f64) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        match option {
            GlobalOption::UpdateThreads => state.update_threads = value.max(0.0) as u32,
            GlobalOption::UpdatePeriodMs => state.update_period_ms = value.max(1.0) as u32,
            GlobalOption::GlobalStreamVolume => state.global_volume = value.max(0.0) as f32,
        }
        Ok(())
    }

    fn update(&self, period_ms: u32) -> BackendResult<()> {
        self.shared.update(period_ms)
    }

    fn create_mixer(
        &self,
        sample_rate: u32,
        channels: u16,
        decode_only: bool,
    ) -> BackendResult<ChannelHandle> {
        let mut state = self.shared.state.lock();
        state.require_device()?;
        Ok(state.allocate(Channel {
            kind: ChannelKind::Mixer { inputs: Vec::new() },
            sample_rate,
            channels,
            format: SampleFormat::F32,
            decode_only,
            state: ChannelState::Stopped,
            volume: 1.0,
            pan: 0.0,
            frequency: sample_rate as f32,
            buffer_secs: 0.1,
            parent: None,
            spatial: None,
            last_output: Vec::new(),
            peak: None,
        }))
    }

    fn create_file_stream(&self, path: &Path, flags: StreamFlags) -> BackendResult<ChannelHandle> {
        self.shared.state.lock().require_device()?;

        // Decode without holding the mix lock
        let audio = self.shared.cache.get_or_decode(path)?;

        let mut state = self.shared.state.lock();
        let sample_rate = audio.sample_rate;
        let channels = audio.channels;
        Ok(state.allocate(Channel {
            kind: ChannelKind::Stream {
                audio,
                source: path.to_path_buf(),
                cursor: 0.0,
            },
            sample_rate,
            channels,
            format: if flags.float_samples {
                SampleFormat::F32
            } else {
                SampleFormat::I16
            },
            decode_only: flags.decode_only,
            state: ChannelState::Stopped,
            volume: 1.0,
            pan: 0.0,
            frequency: sample_rate as f32,
            buffer_secs: 0.1,
            parent: None,
            spatial: flags.spatial.then(SpatialState::new),
            last_output: Vec::new(),
            peak: None,
        }))
    }

    fn attach(&self, mixer: ChannelHandle, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        if mixer == channel {
            return Err(BackendError::NotAMixer(mixer));
        }
        let child = state.channel(channel)?;
        if child.parent.is_some() {
            return Err(BackendError::AlreadyAttached(channel));
        }
        match state.channel_mut(mixer)? {
            Channel {
                kind: ChannelKind::Mixer { inputs },
                ..
            } => inputs.push(channel),
            _ => return Err(BackendError::NotAMixer(mixer)),
        }
        state.channel_mut(channel)?.parent = Some(mixer);
        Ok(())
    }

    fn detach(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        state.channel(channel)?;
        state.detach(channel);
        Ok(())
    }

    fn free_channel(&self, channel: ChannelHandle) -> BackendResult<()> {
        let removed = {
            let mut state = self.shared.state.lock();
            state.channel(channel)?;
            state.detach(channel);
            state.channels.remove(&channel)
        };

        match removed.map(|c| c.kind) {
            Some(ChannelKind::Mixer { inputs }) => {
                let mut state = self.shared.state.lock();
                for input in inputs {
                    if let Some(child) = state.channels.get_mut(&input) {
                        child.parent = None;
                    }
                }
            }
            Some(ChannelKind::Stream { audio, source, .. }) => {
                drop(audio);
                self.shared.cache.release(&source);
            }
            None => {}
        }
        Ok(())
    }

    fn channel_info(&self, channel: ChannelHandle) -> BackendResult<ChannelInfo> {
        Ok(self.shared.state.lock().channel(channel)?.info())
    }

    fn length_bytes(&self, channel: ChannelHandle) -> BackendResult<u64> {
        let state = self.shared.state.lock();
        let ch = state.channel(channel)?;
        match &ch.kind {
            ChannelKind::Stream { audio, .. } => {
                Ok((audio.frames() * ch.info().block_align()) as u64)
            }
            ChannelKind::Mixer { .. } => Ok(0),
        }
    }

    fn position_bytes(&self, channel: ChannelHandle) -> BackendResult<u64> {
        let state = self.shared.state.lock();
        let ch = state.channel(channel)?;
        match &ch.kind {
            ChannelKind::Stream { cursor, .. } => {
                Ok(cursor.floor().max(0.0) as u64 * ch.info().block_align() as u64)
            }
            ChannelKind::Mixer { .. } => Ok(0),
        }
    }

    fn set_position_bytes(&self, channel: ChannelHandle, position: u64) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        let align = ch.info().block_align().max(1) as u64;
        match &mut ch.kind {
            ChannelKind::Stream { audio, cursor, .. } => {
                let frame = position / align;
                if frame > audio.frames() as u64 {
                    return Err(BackendError::Position { channel, position });
                }
                *cursor = frame as f64;
                Ok(())
            }
            ChannelKind::Mixer { .. } => Err(BackendError::Position { channel, position }),
        }
    }

    fn play(&self, channel: ChannelHandle, restart: bool) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        if let (true, ChannelKind::Stream { cursor, .. }) = (restart, &mut ch.kind) {
            *cursor = 0.0;
        }
        ch.state = ChannelState::Playing;
        Ok(())
    }

    fn pause(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        if ch.state == ChannelState::Playing {
            ch.state = ChannelState::Paused;
        }
        Ok(())
    }

    fn stop(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        state.channel_mut(channel)?.state = ChannelState::Stopped;
        Ok(())
    }

    fn state(&self, channel: ChannelHandle) -> ChannelState {
        self.shared
            .state
            .lock()
            .channels
            .get(&channel)
            .map(|c| c.state)
            .unwrap_or(ChannelState::Stopped)
    }

    fn attribute(&self, channel: ChannelHandle, attribute: ChannelAttribute) -> BackendResult<f32> {
        let state = self.shared.state.lock();
        let ch = state.channel(channel)?;
        Ok(match attribute {
            ChannelAttribute::Volume => ch.volume,
            ChannelAttribute::Pan => ch.pan,
            ChannelAttribute::Frequency => ch.frequency,
            ChannelAttribute::Buffer => ch.buffer_secs,
        })
    }

    fn set_attribute(
        &self,
        channel: ChannelHandle,
        attribute: ChannelAttribute,
        value: f32,
    ) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        match attribute {
            ChannelAttribute::Volume => ch.volume = value.max(0.0),
            ChannelAttribute::Pan => ch.pan = value.clamp(-1.0, 1.0),
            ChannelAttribute::Frequency => ch.frequency = value.max(1.0),
            ChannelAttribute::Buffer => ch.buffer_secs = value.max(0.0),
        }
        Ok(())
    }

    fn read_data(&self, channel: ChannelHandle, max_bytes: usize) -> BackendResult<SampleData> {
        let mut state = self.shared.state.lock();
        let info = state.channel(channel)?.info();
        let frames = max_bytes / info.block_align().max(1);

        let samples = if info.is_mixer {
            state.render_mixer(channel, frames)?
        } else {
            let ch = state.channel_mut(channel)?;
            let step = ch.frequency as f64 / ch.sample_rate.max(1) as f64;
            let block = match &mut ch.kind {
                ChannelKind::Stream { audio, cursor, .. } => {
                    pull_frames(audio, cursor, frames, step)
                }
                ChannelKind::Mixer { .. } => Vec::new(),
            };
            ch.note_output(&block);
            block
        };

        Ok(SampleData::from_f32(samples, info.format))
    }

    fn level(&self, channel: ChannelHandle) -> Option<(f32, f32)> {
        self.shared
            .state
            .lock()
            .channels
            .get(&channel)
            .and_then(|c| c.peak)
    }

    fn capture(&self, channel: ChannelHandle, frames: usize) -> Option<Vec<f32>> {
        let state = self.shared.state.lock();
        let ch = state.channels.get(&channel)?;
        if ch.last_output.is_empty() {
            return None;
        }
        let wanted = frames * ch.channels.max(1) as usize;
        let start = ch.last_output.len().saturating_sub(wanted);
        Some(ch.last_output[start..].to_vec())
    }

    fn set_3d_attributes(
        &self,
        channel: ChannelHandle,
        attributes: &Attributes3d,
    ) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        ch.spatial
            .get_or_insert_with(SpatialState::new)
            .attributes = *attributes;
        Ok(())
    }

    fn set_3d_position(&self, channel: ChannelHandle, position: &Position3d) -> BackendResult<()> {
        let mut state = self.shared.state.lock();
        let ch = state.channel_mut(channel)?;
        ch.spatial.get_or_insert_with(SpatialState::new).position = *position;
        Ok(())
    }

    fn set_listener(&self, listener: &Listener3d) -> BackendResult<()> {
        self.shared.state.lock().listener = *listener;
        Ok(())
    }

    fn apply_3d(&self) {
        let mut state = self.shared.state.lock();
        let listener = state.listener;
        for channel in state.channels.values_mut() {
            if let Some(spatial) = channel.spatial.as_mut() {
                spatial.gain = spatial.compute_gain(&listener);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sf_core::Vec3;

    fn backend_with(path: &str, samples: Vec<f32>, rate: u32, channels: u16) -> SoftwareBackend {
        let backend = SoftwareBackend::headless();
        backend.init_device(48000, 2).unwrap();
        backend
            .cache()
            .insert(path, DecodedAudio::new(samples, rate, channels));
        backend
    }

    #[test]
    fn test_requires_device() {
        let backend = SoftwareBackend::headless();
        assert_eq!(
            backend.create_mixer(48000, 2, true),
            Err(BackendError::NotInitialized)
        );
        backend.init_device(48000, 2).unwrap();
        assert_eq!(
            backend.init_device(48000, 2),
            Err(BackendError::AlreadyInitialized)
        );
        backend.free_device().unwrap();
        assert_eq!(backend.free_device(), Err(BackendError::NotInitialized));
    }

    #[test]
    fn test_read_data_exact_copy() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32 * 0.01).collect();
        let backend = backend_with("/mem/a.wav", samples.clone(), 48000, 2);
        let stream = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();

        let data = backend.read_data(stream, 4 * 8).unwrap();
        assert_eq!(data, SampleData::F32(samples[..8].to_vec()));
        assert_eq!(backend.position_bytes(stream).unwrap(), 32);

        // Remaining 6 frames only
        let data = backend.read_data(stream, 100 * 8).unwrap();
        assert_eq!(data.len(), 12);
        assert!(backend.read_data(stream, 64).unwrap().is_empty());
    }

    #[test]
    fn test_integer_stream_format() {
        let backend = backend_with("/mem/i.wav", vec![0.5; 8], 48000, 1);
        let stream = backend
            .create_file_stream(Path::new("/mem/i.wav"), StreamFlags::default())
            .unwrap();
        let info = backend.channel_info(stream).unwrap();
        assert_eq!(info.format, SampleFormat::I16);
        assert_eq!(info.block_align(), 2);

        let data = backend.read_data(stream, 8).unwrap();
        assert!(matches!(data, SampleData::I16(ref v) if v.len() == 4));
    }

    #[test]
    fn test_set_position_past_end_fails() {
        let backend = backend_with("/mem/a.wav", vec![0.0; 10], 48000, 1);
        let stream = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        assert_eq!(backend.length_bytes(stream).unwrap(), 40);
        assert!(backend.set_position_bytes(stream, 40).is_ok());
        assert!(matches!(
            backend.set_position_bytes(stream, 44),
            Err(BackendError::Position { .. })
        ));
    }

    #[test]
    fn test_mixer_sums_playing_inputs_with_volume() {
        let backend = backend_with("/mem/a.wav", vec![0.5; 100], 48000, 1);
        let mixer = backend.create_mixer(48000, 1, true).unwrap();
        let a = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        let b = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        backend.attach(mixer, a).unwrap();
        backend.attach(mixer, b).unwrap();
        assert_eq!(backend.attach(mixer, b), Err(BackendError::AlreadyAttached(b)));

        backend.play(a, false).unwrap();
        backend.play(b, false).unwrap();
        backend
            .set_attribute(b, ChannelAttribute::Volume, 0.5)
            .unwrap();

        let data = backend.read_data(mixer, 10 * 4).unwrap().to_f32();
        assert_eq!(data.len(), 10);
        for s in data {
            assert_relative_eq!(s, 0.75);
        }

        // Paused inputs are not pulled
        backend.pause(a).unwrap();
        let data = backend.read_data(mixer, 4 * 4).unwrap().to_f32();
        assert_relative_eq!(data[0], 0.25);
        assert_eq!(backend.position_bytes(a).unwrap(), 40);
    }

    #[test]
    fn test_stream_stops_at_end_inside_mixer() {
        let backend = backend_with("/mem/a.wav", vec![1.0; 4], 48000, 1);
        let mixer = backend.create_mixer(48000, 1, true).unwrap();
        let a = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        backend.attach(mixer, a).unwrap();
        backend.play(a, false).unwrap();

        let data = backend.read_data(mixer, 8 * 4).unwrap().to_f32();
        assert_eq!(data, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(backend.state(a), ChannelState::Stopped);
    }

    #[test]
    fn test_frequency_changes_rate() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let backend = backend_with("/mem/ramp.wav", samples, 48000, 1);
        let a = backend
            .create_file_stream(Path::new("/mem/ramp.wav"), StreamFlags::decode_float())
            .unwrap();
        backend
            .set_attribute(a, ChannelAttribute::Frequency, 96000.0)
            .unwrap();

        let data = backend.read_data(a, 4 * 4).unwrap().to_f32();
        assert_eq!(data, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_free_mixer_releases_inputs() {
        let backend = backend_with("/mem/a.wav", vec![0.0; 4], 48000, 1);
        let mixer = backend.create_mixer(48000, 2, true).unwrap();
        let a = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        backend.attach(mixer, a).unwrap();
        backend.free_channel(mixer).unwrap();

        let other = backend.create_mixer(48000, 2, true).unwrap();
        assert!(backend.attach(other, a).is_ok());
        assert_eq!(
            backend.free_channel(mixer),
            Err(BackendError::InvalidHandle(mixer))
        );
    }

    #[test]
    fn test_update_renders_started_global_mixer() {
        let backend = backend_with("/mem/a.wav", vec![0.5; 48000], 48000, 1);
        let global = backend.create_mixer(48000, 2, false).unwrap();
        let bus = backend.create_mixer(48000, 2, true).unwrap();
        let a = backend
            .create_file_stream(Path::new("/mem/a.wav"), StreamFlags::decode_float())
            .unwrap();
        backend.attach(global, bus).unwrap();
        backend.attach(bus, a).unwrap();
        backend.play(a, false).unwrap();

        // Global not started: nothing pulled
        backend.update(10).unwrap();
        assert_eq!(backend.position_bytes(a).unwrap(), 0);

        backend.play(global, false).unwrap();
        backend.update(10).unwrap();
        assert_eq!(backend.position_bytes(a).unwrap(), 480 * 4);
        let (l, r) = backend.level(global).unwrap();
        assert_relative_eq!(l, 0.5);
        assert_relative_eq!(r, 0.5);
        assert_eq!(backend.capture(global, 16).unwrap().len(), 32);
    }

    #[test]
    fn test_spatial_distance_attenuation() {
        let backend = backend_with("/mem/a.wav", vec![1.0; 100], 48000, 1);
        let mixer = backend.create_mixer(48000, 1, true).unwrap();
        let a = backend
            .create_file_stream(
                Path::new("/mem/a.wav"),
                StreamFlags::decode_float().with_spatial(),
            )
            .unwrap();
        backend.attach(mixer, a).unwrap();
        backend.play(a, false).unwrap();

        backend
            .set_3d_attributes(
                a,
                &Attributes3d {
                    min_distance: 1.0,
                    max_distance: 10.0,
                    ..Default::default()
                },
            )
            .unwrap();
        backend
            .set_3d_position(
                a,
                &Position3d {
                    position: Vec3::new(0.0, 0.0, 4.0),
                    ..Default::default()
                },
            )
            .unwrap();

        // Not applied yet
        let before = backend.read_data(mixer, 4).unwrap().to_f32();
        assert_relative_eq!(before[0], 1.0);

        backend.apply_3d();
        let after = backend.read_data(mixer, 4).unwrap().to_f32();
        assert_relative_eq!(after[0], 0.25);
    }
}
