//! Frame-by-frame offline mixdown

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use sf_backend::SoftwareBackend;
use sf_core::{AudioConfig, ClipResource};
use sf_engine::AudioEngine;

/// One render job
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub clips: Vec<ClipResource>,
    pub fps: f64,
    pub start: f64,
    pub end: f64,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub frames: usize,
    pub samples_per_channel: usize,
}

/// Load a JSON clip list
pub fn load_project(path: &Path) -> Result<Vec<ClipResource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading project {}", path.display()))?;
    let clips: Vec<ClipResource> = serde_json::from_str(&text)
        .with_context(|| format!("parsing project {}", path.display()))?;
    Ok(clips)
}

/// Sample index of video frame `frame` at `fps`
fn frame_sample(frame: usize, fps: f64, sample_rate: u32) -> i64 {
    sf_core::seconds_to_frames(frame as f64 / fps, sample_rate)
}

/// Render `job` through the stateless mixdown and write a 32-bit float WAV.
///
/// Frame durations follow the rounded sample grid of the whole render, so the
/// file holds exactly `round((end - start) × rate)` frames.
pub fn render(job: &RenderJob, config: AudioConfig) -> Result<RenderStats> {
    if job.fps <= 0.0 {
        bail!("fps must be positive, got {}", job.fps);
    }
    if job.end < job.start {
        bail!("end ({}) is before start ({})", job.end, job.start);
    }
    config.validate()?;

    let rate = config.mixer_sample_rate;
    let channels = config.mixer_channels;
    let frames = ((job.end - job.start) * job.fps).ceil() as usize;
    let total_samples = sf_core::seconds_to_frames(job.end - job.start, rate);

    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&job.output, spec)
        .with_context(|| format!("creating {}", job.output.display()))?;

    let backend = Arc::new(SoftwareBackend::headless());
    let mut engine = AudioEngine::new(backend, config);
    engine
        .initialize()
        .context("initializing the audio engine")?;

    log::info!(
        "[Render] {} clips, {} frames at {} fps ({:.3}s..{:.3}s)",
        job.clips.len(),
        frames,
        job.fps,
        job.start,
        job.end
    );

    let mut written: i64 = 0;
    for frame in 0..frames {
        let first = frame_sample(frame, job.fps, rate);
        let next = frame_sample(frame + 1, job.fps, rate).min(total_samples);
        if next <= first {
            break;
        }
        let time = job.start + sf_core::frames_to_seconds(first, rate);
        let duration = sf_core::frames_to_seconds(next - first, rate);

        let block = engine.get_full_mix_down_buffer(&job.clips, duration, time);
        for sample in block {
            writer.write_sample(sample)?;
        }
        written += next - first;

        if frame % 100 == 0 {
            log::debug!("[Render] Frame {}/{} at {:.3}s", frame, frames, time);
        }
    }

    writer.finalize().context("finalizing WAV")?;
    log::info!(
        "[Render] Wrote {} ({} samples per channel)",
        job.output.display(),
        written
    );

    Ok(RenderStats {
        frames,
        samples_per_channel: written as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::ClipIdentity;

    fn write_constant(path: &Path, value: f32, secs: f64) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(secs * 48000.0) as usize * 2 {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_project_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"[{"id": {"Resource": 4}, "file_path": "a.wav", "length": 2.5, "is_soundtrack": true}]"#,
        )
        .unwrap();

        let clips = load_project(&path).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].id, ClipIdentity::resource(4));
        assert_eq!(clips[0].volume, 1.0);
        assert!(clips[0].is_soundtrack);
    }

    #[test]
    fn test_render_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let clip_path = dir.path().join("bed.wav");
        write_constant(&clip_path, 0.25, 1.0);
        let job = RenderJob {
            clips: vec![
                ClipResource::new(ClipIdentity::resource(1), &clip_path, 1.0)
                    .soundtrack()
                    .with_start_time(0.5),
            ],
            fps: 30.0,
            start: 0.0,
            end: 1.0,
            output: dir.path().join("mix.wav"),
        };

        let stats = render(&job, AudioConfig::headless()).unwrap();
        assert_eq!(stats.frames, 30);
        assert_eq!(stats.samples_per_channel, 48000);

        let mut reader = hound::WavReader::open(&job.output).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 96000);
        assert_eq!(samples[0], 0.0);
        assert!((samples[95000] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_render_rejects_bad_fps() {
        let dir = tempfile::tempdir().unwrap();
        let job = RenderJob {
            clips: Vec::new(),
            fps: 0.0,
            start: 0.0,
            end: 1.0,
            output: dir.path().join("mix.wav"),
        };
        assert!(render(&job, AudioConfig::headless()).is_err());
    }
}
