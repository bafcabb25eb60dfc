//! Shared fixtures for sf-engine integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sf_backend::*;

// ═══════════════════════════════════════════════════════════════════════════
// WAV FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

pub fn write_wav(dir: &Path, name: &str, samples: &[f32], sample_rate: u32, channels: u16) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// `secs` seconds of a constant value
pub fn write_constant(
    dir: &Path,
    name: &str,
    value: f32,
    secs: f64,
    sample_rate: u32,
    channels: u16,
) -> PathBuf {
    let frames = (secs * sample_rate as f64).round() as usize;
    write_wav(dir, name, &vec![value; frames * channels as usize], sample_rate, channels)
}

/// Empty placeholder; the mock backend never decodes it
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").unwrap();
    path
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK BACKEND
// ═══════════════════════════════════════════════════════════════════════════

/// Value every mock stream delivers
pub const MOCK_SAMPLE: f32 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    InitDevice(u32, u16),
    FreeDevice,
    CreateMixer(ChannelHandle),
    CreateStream(ChannelHandle),
    Attach(ChannelHandle, ChannelHandle),
    Detach(ChannelHandle),
    Free(ChannelHandle),
    Seek(ChannelHandle, u64),
    Play(ChannelHandle),
    Pause(ChannelHandle),
    Read(ChannelHandle, usize),
}

struct MockChannel {
    info: ChannelInfo,
    state: ChannelState,
    position: u64,
    attributes: HashMap<ChannelAttribute, f32>,
}

#[derive(Default)]
struct MockState {
    device: bool,
    next_handle: u32,
    channels: HashMap<ChannelHandle, MockChannel>,
    options: HashMap<GlobalOption, f64>,
    /// Bytes delivered by successive `read_data` calls, ignoring `max_bytes`
    deliveries: VecDeque<usize>,
    fail_attach: bool,
    fail_create: bool,
    calls: Vec<Call>,
}

/// Scriptable backend: float streams of `MOCK_SAMPLE`, with configurable
/// short and oversized reads and failure switches
pub struct MockBackend {
    stream_rate: u32,
    stream_channels: u16,
    stream_secs: f64,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(stream_rate: u32, stream_channels: u16, stream_secs: f64) -> Self {
        Self {
            stream_rate,
            stream_channels,
            stream_secs,
            state: Mutex::new(MockState {
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    pub fn shared(stream_rate: u32, stream_channels: u16, stream_secs: f64) -> Arc<Self> {
        Arc::new(Self::new(stream_rate, stream_channels, stream_secs))
    }

    pub fn script_deliveries(&self, bytes: impl IntoIterator<Item = usize>) {
        self.state.lock().deliveries.extend(bytes);
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn live_channels(&self) -> usize {
        self.state.lock().channels.len()
    }

    fn stream_info(&self) -> ChannelInfo {
        ChannelInfo {
            sample_rate: self.stream_rate,
            channels: self.stream_channels,
            format: SampleFormat::F32,
            decode_only: true,
            is_mixer: false,
        }
    }

    fn stream_length(&self) -> u64 {
        self.stream_info().seconds_to_bytes(self.stream_secs).max(0) as u64
    }

    fn insert(&self, state: &mut MockState, info: ChannelInfo) -> ChannelHandle {
        let handle = ChannelHandle(state.next_handle);
        state.next_handle += 1;
        let mut attributes = HashMap::new();
        attributes.insert(ChannelAttribute::Volume, 1.0);
        attributes.insert(ChannelAttribute::Pan, 0.0);
        attributes.insert(ChannelAttribute::Frequency, info.sample_rate as f32);
        attributes.insert(ChannelAttribute::Buffer, 0.5);
        state.channels.insert(
            handle,
            MockChannel {
                info,
                state: ChannelState::Stopped,
                position: 0,
                attributes,
            },
        );
        handle
    }
}

fn known(state: &MockState, channel: ChannelHandle) -> BackendResult<()> {
    if state.channels.contains_key(&channel) {
        Ok(())
    } else {
        Err(BackendError::InvalidHandle(channel))
    }
}

impl AudioBackend for MockBackend {
    fn is_device_initialized(&self) -> bool {
        self.state.lock().device
    }

    fn init_device(&self, sample_rate: u32, channels: u16) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.device {
            return Err(BackendError::AlreadyInitialized);
        }
        state.device = true;
        state.calls.push(Call::InitDevice(sample_rate, channels));
        Ok(())
    }

    fn free_device(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.device = false;
        state.channels.clear();
        state.calls.push(Call::FreeDevice);
        Ok(())
    }

    fn option(&self, option: GlobalOption) -> f64 {
        let state = self.state.lock();
        state.options.get(&option).copied().unwrap_or(match option {
            GlobalOption::UpdateThreads => 1.0,
            GlobalOption::UpdatePeriodMs => 10.0,
            GlobalOption::GlobalStreamVolume => 1.0,
        })
    }

    fn set_option(&self, option: GlobalOption, value: f64) -> BackendResult<()> {
        self.state.lock().options.insert(option, value);
        Ok(())
    }

    fn update(&self, _period_ms: u32) -> BackendResult<()> {
        Ok(())
    }

    fn create_mixer(
        &self,
        sample_rate: u32,
        channels: u16,
        decode_only: bool,
    ) -> BackendResult<ChannelHandle> {
        let mut state = self.state.lock();
        if !state.device {
            return Err(BackendError::NotInitialized);
        }
        let handle = self.insert(
            &mut state,
            ChannelInfo {
                sample_rate,
                channels,
                format: SampleFormat::F32,
                decode_only,
                is_mixer: true,
            },
        );
        state.calls.push(Call::CreateMixer(handle));
        Ok(handle)
    }

    fn create_file_stream(&self, path: &Path, _flags: StreamFlags) -> BackendResult<ChannelHandle> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(BackendError::UnsupportedFormat(path.display().to_string()));
        }
        let handle = self.insert(&mut state, self.stream_info());
        state.calls.push(Call::CreateStream(handle));
        Ok(handle)
    }

    fn attach(&self, mixer: ChannelHandle, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        known(&state, mixer)?;
        known(&state, channel)?;
        if state.fail_attach {
            return Err(BackendError::NotAMixer(mixer));
        }
        state.calls.push(Call::Attach(mixer, channel));
        Ok(())
    }

    fn detach(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        known(&state, channel)?;
        state.calls.push(Call::Detach(channel));
        Ok(())
    }

    fn free_channel(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        state
            .channels
            .remove(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        state.calls.push(Call::Free(channel));
        Ok(())
    }

    fn channel_info(&self, channel: ChannelHandle) -> BackendResult<ChannelInfo> {
        let state = self.state.lock();
        state
            .channels
            .get(&channel)
            .map(|c| c.info)
            .ok_or(BackendError::InvalidHandle(channel))
    }

    fn length_bytes(&self, channel: ChannelHandle) -> BackendResult<u64> {
        self.channel_info(channel)?;
        Ok(self.stream_length())
    }

    fn position_bytes(&self, channel: ChannelHandle) -> BackendResult<u64> {
        let state = self.state.lock();
        state
            .channels
            .get(&channel)
            .map(|c| c.position)
            .ok_or(BackendError::InvalidHandle(channel))
    }

    fn set_position_bytes(&self, channel: ChannelHandle, position: u64) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        ch.position = position;
        state.calls.push(Call::Seek(channel, position));
        Ok(())
    }

    fn play(&self, channel: ChannelHandle, restart: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        ch.state = ChannelState::Playing;
        if restart {
            ch.position = 0;
        }
        state.calls.push(Call::Play(channel));
        Ok(())
    }

    fn pause(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        ch.state = ChannelState::Paused;
        state.calls.push(Call::Pause(channel));
        Ok(())
    }

    fn stop(&self, channel: ChannelHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        ch.state = ChannelState::Stopped;
        ch.position = 0;
        Ok(())
    }

    fn state(&self, channel: ChannelHandle) -> ChannelState {
        self.state
            .lock()
            .channels
            .get(&channel)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    fn attribute(&self, channel: ChannelHandle, attribute: ChannelAttribute) -> BackendResult<f32> {
        let state = self.state.lock();
        let ch = state
            .channels
            .get(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        Ok(ch.attributes.get(&attribute).copied().unwrap_or(0.0))
    }

    fn set_attribute(
        &self,
        channel: ChannelHandle,
        attribute: ChannelAttribute,
        value: f32,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;
        ch.attributes.insert(attribute, value);
        Ok(())
    }

    fn read_data(&self, channel: ChannelHandle, max_bytes: usize) -> BackendResult<SampleData> {
        let length = self.stream_length();
        let mut state = self.state.lock();
        let scripted = state.deliveries.pop_front();
        let ch = state
            .channels
            .get_mut(&channel)
            .ok_or(BackendError::InvalidHandle(channel))?;

        let bytes = match scripted {
            Some(bytes) => bytes,
            None => max_bytes.min(length.saturating_sub(ch.position) as usize),
        };
        let samples = bytes / sf_core::F32_SAMPLE_BYTES;
        ch.position += (samples * sf_core::F32_SAMPLE_BYTES) as u64;
        state.calls.push(Call::Read(channel, max_bytes));
        Ok(SampleData::F32(vec![MOCK_SAMPLE; samples]))
    }

    fn level(&self, channel: ChannelHandle) -> Option<(f32, f32)> {
        let state = self.state.lock();
        state.channels.get(&channel).map(|_| (MOCK_SAMPLE, MOCK_SAMPLE))
    }

    fn capture(&self, channel: ChannelHandle, frames: usize) -> Option<Vec<f32>> {
        let state = self.state.lock();
        state
            .channels
            .get(&channel)
            .map(|c| vec![MOCK_SAMPLE; frames * c.info.channels as usize])
    }

    fn set_3d_attributes(
        &self,
        channel: ChannelHandle,
        _attributes: &Attributes3d,
    ) -> BackendResult<()> {
        known(&self.state.lock(), channel)
    }

    fn set_3d_position(&self, channel: ChannelHandle, _position: &Position3d) -> BackendResult<()> {
        known(&self.state.lock(), channel)
    }

    fn set_listener(&self, _listener: &Listener3d) -> BackendResult<()> {
        Ok(())
    }

    fn apply_3d(&self) {}
}
