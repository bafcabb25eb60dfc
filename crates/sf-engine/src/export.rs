//! Export Pipeline
//!
//! Frame-exact PCM for video export, two strategies:
//! - Buffered: reuse the live clip streams, drained through per-clip FIFOs
//!   synchronized to the render clock (`prepare_recording` → `capture_frame`
//!   per frame → `end_recording`)
//! - Stateless: open, seek, read and close a fresh stream per clip and frame
//!   (`get_full_mix_down_buffer`), then merge registered export sources

use std::collections::HashMap;
use std::sync::Arc;

use sf_backend::{AudioBackend, GlobalOption, SampleFormat, StreamFlags};
use sf_core::{AudioConfig, ClipIdentity, ClipResource};

use crate::{
    AudioAnalysis, AudioError, AudioResult, ClipStream, ExportSource, FifoByteQueue,
    mix_export_sources, mix_into, resample_linear,
};

/// Backend options overridden while recording
#[derive(Debug, Clone, Copy, PartialEq)]
struct GlobalSnapshot {
    update_threads: f64,
    update_period_ms: f64,
    global_volume: f64,
}

impl GlobalSnapshot {
    fn take(backend: &dyn AudioBackend) -> Self {
        Self {
            update_threads: backend.option(GlobalOption::UpdateThreads),
            update_period_ms: backend.option(GlobalOption::UpdatePeriodMs),
            global_volume: backend.option(GlobalOption::GlobalStreamVolume),
        }
    }

    fn restore(&self, backend: &dyn AudioBackend) {
        for (option, value) in [
            (GlobalOption::UpdatePeriodMs, self.update_period_ms),
            (GlobalOption::UpdateThreads, self.update_threads),
            (GlobalOption::GlobalStreamVolume, self.global_volume),
        ] {
            if let Err(e) = backend.set_option(option, value) {
                log::warn!("[ExportPipeline] Failed to restore {:?}: {}", option, e);
            }
        }
    }
}

/// Export state: per-clip FIFOs and the backend settings to restore
#[derive(Default)]
pub struct ExportPipeline {
    fifos: HashMap<ClipIdentity, FifoByteQueue>,
    snapshot: Option<GlobalSnapshot>,
    fps: f64,
    /// Clip captured most recently (the primary soundtrack)
    last_captured: Option<ClipIdentity>,
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BUFFERED STRATEGY
    // ═══════════════════════════════════════════════════════════════════════

    /// Switch to frame-driven updates and prime every soundtrack stream paused at 0
    pub fn prepare_recording<'a>(
        &mut self,
        backend: &dyn AudioBackend,
        fps: f64,
        soundtrack_streams: impl IntoIterator<Item = &'a mut ClipStream>,
    ) {
        if self.snapshot.is_none() {
            self.snapshot = Some(GlobalSnapshot::take(backend));
        }
        if let Err(e) = backend.set_option(GlobalOption::UpdateThreads, 0.0) {
            log::warn!("[ExportPipeline] Failed to disable background updates: {}", e);
        }

        self.fps = fps;
        let frame_secs = if fps > 0.0 { 1.0 / fps } else { 0.0 };

        let mut primed = 0;
        for stream in soundtrack_streams {
            stream.set_buffer_secs(frame_secs as f32);
            stream.seek(0.0);
            stream.play();
            stream.pause();
            primed += 1;
        }

        self.fifos.clear();
        self.last_captured = None;
        log::info!(
            "[ExportPipeline] Recording prepared at {} fps ({} soundtrack streams)",
            fps,
            primed
        );
    }

    /// Append one export frame of `id`'s stream to its FIFO.
    ///
    /// The FIFO holds exactly `frame_duration` worth of bytes afterwards: zeros
    /// for the part before the clip start, real data, then zero padding or
    /// oldest-first trimming.
    pub fn capture_frame(
        &mut self,
        id: &ClipIdentity,
        stream: &mut ClipStream,
        clip_start: f64,
        render_time: f64,
        frame_duration: f64,
        analysis: Option<&mut AudioAnalysis>,
    ) {
        let info = *stream.info();
        let offset = info.seconds_to_bytes(render_time - clip_start);
        let needed = info.seconds_to_bytes(frame_duration).max(0) as usize;

        let first_frame = !self.fifos.contains_key(id);
        if first_frame && offset > 0 {
            // Recording starts inside the clip
            stream.seek(render_time - clip_start);
        }

        let fifo = self.fifos.entry(id.clone()).or_default();

        let preroll = if offset < 0 {
            (offset.unsigned_abs() as usize).min(needed)
        } else {
            0
        };
        fifo.enqueue_zeros(preroll);

        let to_read = needed - preroll;
        if to_read > 0 {
            match stream.read_data(to_read) {
                Ok(data) => fifo.enqueue(data.as_bytes()),
                Err(e) => {
                    let e = AudioError::ExportWrite(e.to_string());
                    log::warn!("[ExportPipeline] {} frame at {:.3}s: {}", id, render_time, e);
                }
            }
        }

        fifo.normalize(needed);

        if let Some(analysis) = analysis {
            let samples = fifo_samples(fifo, info.format);
            analysis.process_interleaved(&samples, info.channels as usize);
        }

        self.last_captured = Some(id.clone());
    }

    /// Restore backend settings and stream buffers. Safe without a recording.
    pub fn end_recording<'a>(
        &mut self,
        backend: &dyn AudioBackend,
        config: &AudioConfig,
        soundtrack_streams: impl IntoIterator<Item = &'a mut ClipStream>,
    ) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };

        snapshot.restore(backend);
        for stream in soundtrack_streams {
            stream.set_buffer_secs(config.device_buffer_secs);
        }

        self.fifos.clear();
        self.last_captured = None;
        log::info!("[ExportPipeline] Recording ended");
    }

    /// Drain one clip's FIFO (native-format interleaved bytes)
    pub fn take_frame(&mut self, id: &ClipIdentity) -> Vec<u8> {
        self.fifos
            .get_mut(id)
            .map(FifoByteQueue::drain_all)
            .unwrap_or_default()
    }

    /// Drain the most recently captured clip's FIFO as f32 samples
    pub fn take_mix_down_f32(&mut self) -> Vec<f32> {
        let Some(id) = self.last_captured.clone() else {
            return Vec::new();
        };
        let bytes = self.take_frame(&id);
        let usable = bytes.len() - bytes.len() % sf_core::F32_SAMPLE_BYTES;
        bytemuck::pod_collect_to_vec(&bytes[..usable])
    }

    pub fn fifo_len(&self, id: &ClipIdentity) -> Option<usize> {
        self.fifos.get(id).map(FifoByteQueue::len)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATELESS STRATEGY
    // ═══════════════════════════════════════════════════════════════════════

    /// Mix `frame_duration` seconds at timeline `time` from the soundtrack
    /// clips and the export sources, without touching any live stream.
    ///
    /// Returns `round(frame_duration × mixer rate)` interleaved frames at the
    /// mixer channel count. Failing clips or sources contribute silence.
    pub fn get_full_mix_down_buffer(
        backend: &dyn AudioBackend,
        config: &AudioConfig,
        clips: &[ClipResource],
        sources: &[Arc<dyn ExportSource>],
        frame_duration: f64,
        time: f64,
    ) -> Vec<f32> {
        let out_channels = config.mixer_channels as usize;
        let out_frames =
            sf_core::seconds_to_frames(frame_duration, config.mixer_sample_rate).max(0) as usize;
        let mut output = vec![0.0f32; out_frames * out_channels];

        for clip in clips.iter().filter(|c| c.is_soundtrack) {
            let local_time = clip.local_time(time);
            if !clip.contains_local_time(local_time) {
                continue;
            }

            match render_clip(backend, config, clip, local_time, frame_duration, out_frames) {
                Ok(samples) => mix_into(&mut output, &samples, clip.volume),
                Err(e) => {
                    log::warn!("[ExportPipeline] {} rendered as silence: {}", clip.id, e);
                }
            }
        }

        mix_export_sources(sources, time, frame_duration, &mut output);
        output
    }
}

/// Decode one clip window at its native rate and convert it to mixer layout
fn render_clip(
    backend: &dyn AudioBackend,
    config: &AudioConfig,
    clip: &ClipResource,
    local_time: f64,
    frame_duration: f64,
    out_frames: usize,
) -> AudioResult<Vec<f32>> {
    let path = clip.resolve_path(config.resource_root.as_deref());
    if !path.is_file() {
        return Err(AudioError::FileNotFound(path));
    }

    let handle = backend
        .create_file_stream(&path, StreamFlags::decode_float())
        .map_err(|source| AudioError::Decode {
            path: path.clone(),
            source,
        })?;
    let stream = ScopedStream { backend, handle };

    let info = backend.channel_info(stream.handle)?;
    let offset = info.seconds_to_bytes(local_time).max(0) as u64;
    backend.set_position_bytes(stream.handle, offset)?;

    let in_frames = sf_core::seconds_to_frames(frame_duration, info.sample_rate).max(0) as usize;
    let mut samples = backend
        .read_data(stream.handle, in_frames * info.block_align())?
        .to_f32();
    drop(stream);

    // Short read at the end of the file: pad so the window keeps its timing
    let in_channels = info.channels as usize;
    samples.resize(in_frames * in_channels, 0.0);

    Ok(resample_linear(
        &samples,
        in_channels,
        out_frames,
        config.mixer_channels as usize,
    ))
}

/// Decode stream freed when it leaves scope
struct ScopedStream<'a> {
    backend: &'a dyn AudioBackend,
    handle: sf_backend::ChannelHandle,
}

impl Drop for ScopedStream<'_> {
    fn drop(&mut self) {
        let _ = self.backend.free_channel(self.handle);
    }
}

/// FIFO contents as normalized float samples
fn fifo_samples(fifo: &FifoByteQueue, format: SampleFormat) -> Vec<f32> {
    let bytes: Vec<u8> = fifo.iter().copied().collect();
    match format {
        SampleFormat::F32 => {
            let usable = bytes.len() - bytes.len() % 4;
            bytemuck::pod_collect_to_vec(&bytes[..usable])
        }
        SampleFormat::I16 => {
            let usable = bytes.len() - bytes.len() % 2;
            let ints: Vec<i16> = bytemuck::pod_collect_to_vec(&bytes[..usable]);
            ints.iter().map(|&v| v as f32 / 32768.0).collect()
        }
    }
}
