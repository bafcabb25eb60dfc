//! File decoding and decoded-audio cache
//!
//! Uses symphonia for decoding multiple formats:
//! - WAV, AIFF (PCM)
//! - FLAC, ALAC (lossless)
//! - MP3, OGG Vorbis, AAC (lossy)

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{BackendError, BackendResult};

// ═══════════════════════════════════════════════════════════════════════════
// DECODED AUDIO
// ═══════════════════════════════════════════════════════════════════════════

/// Fully decoded file, interleaved f32
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of sample frames
    #[inline]
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        sf_core::frames_to_seconds(self.frames() as i64, self.sample_rate)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DECODER
// ═══════════════════════════════════════════════════════════════════════════

/// Decode a whole audio file into memory
pub fn decode_file(path: &Path) -> BackendResult<DecodedAudio> {
    let file = File::open(path)
        .map_err(|e| BackendError::FileOpen(format!("{}: {}", path.display(), e)))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| BackendError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| BackendError::Decode(format!("{}: no audio track", path.display())))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| BackendError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(BackendError::Decode(format!("{}: {}", path.display(), e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet: skip it, keep the rest of the file
                log::warn!("[Decoder] Skipping packet in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(BackendError::Decode(format!("{}: {}", path.display(), e)));
            }
        }
    }

    if channels == 0 {
        return Err(BackendError::Decode(format!("{}: zero channels", path.display())));
    }

    log::debug!(
        "[Decoder] Decoded {} ({} Hz, {} ch, {} frames)",
        path.display(),
        sample_rate,
        channels,
        samples.len() / channels
    );

    Ok(DecodedAudio::new(samples, sample_rate, channels as u16))
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Size and modification time of a file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug)]
struct CacheEntry {
    audio: Arc<DecodedAudio>,
    /// `None` for audio inserted from memory
    stamp: Option<FileStamp>,
}

/// Decoded files shared between streams opened on the same path.
///
/// File-backed entries are re-decoded when the file's size or modification
/// time changes, and dropped by [`DecodeCache::release`] once no stream holds
/// them. Entries inserted from memory stay until evicted.
#[derive(Debug, Default)]
pub struct DecodeCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return cached audio or decode the file
    pub fn get_or_decode(&self, path: &Path) -> BackendResult<Arc<DecodedAudio>> {
        let stamp = FileStamp::read(path);
        if let Some(entry) = self.entries.lock().get(path) {
            if entry.stamp.is_none() || entry.stamp == stamp {
                return Ok(Arc::clone(&entry.audio));
            }
            log::debug!("[Decoder] {} changed on disk", path.display());
        }

        // Decode outside the lock
        let audio = Arc::new(decode_file(path)?);
        self.entries.lock().insert(
            path.to_path_buf(),
            CacheEntry {
                audio: Arc::clone(&audio),
                stamp,
            },
        );
        Ok(audio)
    }

    /// Insert already decoded audio under `path`
    pub fn insert(&self, path: impl Into<PathBuf>, audio: DecodedAudio) {
        self.entries.lock().insert(
            path.into(),
            CacheEntry {
                audio: Arc::new(audio),
                stamp: None,
            },
        );
    }

    /// Drop the file-backed entry for `path` if only the cache still holds it
    pub fn release(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock();
        let unused = entries
            .get(path)
            .is_some_and(|e| e.stamp.is_some() && Arc::strong_count(&e.audio) == 1);
        if unused {
            entries.remove(path);
        }
        unused
    }

    pub fn evict(&self, path: &Path) -> bool {
        self.entries.lock().remove(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
