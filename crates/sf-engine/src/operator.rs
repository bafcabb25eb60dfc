//! Operator-triggered audio
//!
//! Each operator owns at most one stream. A file-path change is the only
//! reload trigger; all other parameters mutate the live stream in place.
//! Play and stop are edge-triggered (false → true).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sf_core::{AudioConfig, Vec3};

use crate::{ClipStream, Cone, MixerGraph, MixerNode, SpatialClipStream};

// ═══════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════

/// 3D placement of an operator sound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSpatialParams {
    pub position: Vec3,
    pub orientation: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
    pub outer_cone_volume: f32,
}

impl Default for OperatorSpatialParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Vec3::FORWARD,
            min_distance: 1.0,
            max_distance: 100.0,
            inner_cone_angle: 360.0,
            outer_cone_angle: 360.0,
            outer_cone_volume: 1.0,
        }
    }
}

/// Per-frame inputs of an operator sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorAudioParams {
    /// Restart from the beginning on the rising edge
    pub play: bool,
    /// Stop and rewind on the rising edge
    pub stop: bool,
    pub paused: bool,
    pub volume: f32,
    pub mute: bool,
    pub panning: f32,
    pub speed: f64,
    /// Makes the stream a spatial stream when set at load time
    pub spatial: Option<OperatorSpatialParams>,
}

impl Default for OperatorAudioParams {
    fn default() -> Self {
        Self {
            play: false,
            stop: false,
            paused: false,
            volume: 1.0,
            mute: false,
            panning: 0.0,
            speed: 1.0,
            spatial: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Stream owned by an operator
pub enum OperatorStream {
    Plain(ClipStream),
    Spatial(SpatialClipStream),
}

impl OperatorStream {
    pub fn stream(&self) -> &ClipStream {
        match self {
            OperatorStream::Plain(s) => s,
            OperatorStream::Spatial(s) => s.stream(),
        }
    }

    pub fn stream_mut(&mut self) -> &mut ClipStream {
        match self {
            OperatorStream::Plain(s) => s,
            OperatorStream::Spatial(s) => s.stream_mut(),
        }
    }
}

/// One operator's sound: file, stream and trigger memory
#[derive(Default)]
pub struct OperatorAudioState {
    file_path: String,
    stream: Option<OperatorStream>,
    is_paused: bool,
    prev_play: bool,
    prev_stop: bool,
}

impl OperatorAudioState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `path`. On change the old stream is disposed, the state reset,
    /// and `load` is called for a non-empty path. Returns whether the path changed.
    pub fn apply_file_path<F>(&mut self, path: &str, load: F) -> bool
    where
        F: FnOnce(&str) -> Option<OperatorStream>,
    {
        if path == self.file_path {
            return false;
        }

        self.dispose();
        self.file_path = path.to_string();
        if !path.is_empty() {
            self.stream = load(path);
        }
        true
    }

    /// Apply volume, pan, speed, 3D placement and the transport triggers
    pub fn apply_params(&mut self, params: &OperatorAudioParams) {
        let play_edge = params.play && !self.prev_play;
        let stop_edge = params.stop && !self.prev_stop;
        self.prev_play = params.play;
        self.prev_stop = params.stop;

        let Some(operator_stream) = self.stream.as_mut() else {
            return;
        };

        if let (OperatorStream::Spatial(spatial), Some(placement)) =
            (&mut *operator_stream, params.spatial.as_ref())
        {
            spatial.set_orientation(placement.orientation);
            spatial.set_cone(Cone {
                inner_angle: placement.inner_cone_angle,
                outer_angle: placement.outer_cone_angle,
                outer_volume: placement.outer_cone_volume,
            });
            spatial.update_3d_position(
                placement.position,
                placement.min_distance,
                placement.max_distance,
            );
        }

        let stream = operator_stream.stream_mut();
        stream.set_volume(params.volume, params.mute);
        stream.set_panning(params.panning);
        stream.set_playback_speed(params.speed);

        if play_edge {
            stream.stop();
            stream.play();
            self.is_paused = false;
        }
        if stop_edge {
            stream.stop();
            self.is_paused = false;
        }

        if params.paused != self.is_paused {
            if params.paused {
                stream.pause();
            } else {
                stream.resume();
            }
            self.is_paused = params.paused;
        }
    }

    /// Drop the stream and forget trigger/pause state (the path is kept)
    pub fn dispose(&mut self) {
        self.stream = None;
        self.is_paused = false;
        self.prev_play = false;
        self.prev_stop = false;
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&OperatorStream> {
        self.stream.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn level(&self) -> f32 {
        self.stream
            .as_ref()
            .map(|s| s.stream().get_level())
            .unwrap_or(0.0)
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.stream_mut().stop();
        }
        self.is_paused = false;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PLAYER
// ═══════════════════════════════════════════════════════════════════════════

/// Operator sounds keyed by operator id, attached to the Operator bus
#[derive(Default)]
pub struct OperatorAudioPlayer {
    states: HashMap<u64, OperatorAudioState>,
}

impl OperatorAudioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update one operator for this frame
    pub fn update_operator(
        &mut self,
        graph: &MixerGraph,
        config: &AudioConfig,
        operator_id: u64,
        file_path: &str,
        params: &OperatorAudioParams,
    ) {
        let state = self.states.entry(operator_id).or_default();

        state.apply_file_path(file_path, |path| {
            let Some(bus) = graph.node(MixerNode::Operator) else {
                log::warn!(
                    "[OperatorAudio] Operator {} skipped {}: mixer not initialized",
                    operator_id,
                    path
                );
                return None;
            };
            let resolved = match config.resource_root.as_deref() {
                Some(root) if Path::new(path).is_relative() => root.join(path),
                _ => Path::new(path).to_path_buf(),
            };
            let backend = graph.backend();

            let loaded = match params.spatial {
                Some(_) => {
                    SpatialClipStream::try_load(backend, &resolved, bus, config.assumed_frame_rate)
                        .map(OperatorStream::Spatial)
                }
                None => ClipStream::try_load(backend, &resolved, bus).map(OperatorStream::Plain),
            };
            match loaded {
                Ok(stream) => {
                    log::debug!("[OperatorAudio] Operator {} loaded {}", operator_id, path);
                    Some(stream)
                }
                Err(_) => None,
            }
        });

        state.apply_params(params);
    }

    /// Remove an operator and dispose its stream
    pub fn unregister_operator(&mut self, operator_id: u64) -> bool {
        self.states.remove(&operator_id).is_some()
    }

    pub fn stop_all(&mut self) {
        for state in self.states.values_mut() {
            state.stop();
        }
    }

    pub fn level(&self, operator_id: u64) -> f32 {
        self.states
            .get(&operator_id)
            .map(OperatorAudioState::level)
            .unwrap_or(0.0)
    }

    pub fn state(&self, operator_id: u64) -> Option<&OperatorAudioState> {
        self.states.get(&operator_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_backend::{AudioBackend, ChannelAttribute, ChannelState, SoftwareBackend};
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        backend: Arc<SoftwareBackend>,
        graph: MixerGraph,
        config: AudioConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            for name in ["a.wav", "b.wav"] {
                let spec = hound::WavSpec {
                    channels: 2,
                    sample_rate: 48000,
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                };
                let mut writer = hound::WavWriter::create(dir.path().join(name), spec).unwrap();
                for _ in 0..9600 {
                    writer.write_sample(0.5f32).unwrap();
                }
                writer.finalize().unwrap();
            }

            let backend = Arc::new(SoftwareBackend::headless());
            let mut graph = MixerGraph::new(backend.clone());
            let config = AudioConfig::headless().with_resource_root(dir.path());
            graph.initialize(&config).unwrap();
            Self {
                dir,
                backend,
                graph,
                config,
            }
        }
    }

    fn playing() -> OperatorAudioParams {
        OperatorAudioParams {
            play: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_path_disposes_stream() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();

        player.update_operator(&f.graph, &f.config, 1, "a.wav", &playing());
        assert!(player.state(1).unwrap().has_stream());

        let paused = OperatorAudioParams {
            paused: true,
            ..playing()
        };
        player.update_operator(&f.graph, &f.config, 1, "a.wav", &paused);
        assert!(player.state(1).unwrap().is_paused());

        player.update_operator(&f.graph, &f.config, 1, "", &paused);
        let state = player.state(1).unwrap();
        assert!(!state.has_stream());
        assert!(state.file_path().is_empty());
        // Only the three mixer nodes remain
        assert_eq!(f.backend.channel_count(), 3);
    }

    #[test]
    fn test_path_change_reloads() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();
        let params = OperatorAudioParams::default();

        player.update_operator(&f.graph, &f.config, 7, "a.wav", &params);
        let first = player
            .state(7)
            .unwrap()
            .stream()
            .unwrap()
            .stream()
            .handle();

        // Same path: no reload
        player.update_operator(&f.graph, &f.config, 7, "a.wav", &params);
        let same = player.state(7).unwrap().stream().unwrap().stream().handle();
        assert_eq!(first, same);

        player.update_operator(&f.graph, &f.config, 7, "b.wav", &params);
        let second = player.state(7).unwrap().stream().unwrap().stream().handle();
        assert_ne!(first, second);
        assert!(f.backend.channel_info(first).is_err());
    }

    #[test]
    fn test_params_mutate_in_place() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();

        player.update_operator(&f.graph, &f.config, 2, "a.wav", &OperatorAudioParams::default());
        let handle = player.state(2).unwrap().stream().unwrap().stream().handle();

        let params = OperatorAudioParams {
            volume: 0.25,
            panning: -0.5,
            ..Default::default()
        };
        player.update_operator(&f.graph, &f.config, 2, "a.wav", &params);

        assert_eq!(
            player.state(2).unwrap().stream().unwrap().stream().handle(),
            handle
        );
        assert_eq!(
            f.backend.attribute(handle, ChannelAttribute::Volume).unwrap(),
            0.25
        );
        assert_eq!(
            f.backend.attribute(handle, ChannelAttribute::Pan).unwrap(),
            -0.5
        );
    }

    #[test]
    fn test_play_and_stop_are_edge_triggered() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();

        player.update_operator(&f.graph, &f.config, 3, "a.wav", &playing());
        let handle = player.state(3).unwrap().stream().unwrap().stream().handle();
        assert_eq!(f.backend.state(handle), ChannelState::Playing);

        // Move the stream, then hold `play` high: no restart
        f.backend.set_position_bytes(handle, 800).unwrap();
        player.update_operator(&f.graph, &f.config, 3, "a.wav", &playing());
        assert_eq!(f.backend.position_bytes(handle).unwrap(), 800);

        let stop = OperatorAudioParams {
            stop: true,
            ..Default::default()
        };
        player.update_operator(&f.graph, &f.config, 3, "a.wav", &stop);
        assert_eq!(f.backend.state(handle), ChannelState::Stopped);
        assert_eq!(f.backend.position_bytes(handle).unwrap(), 0);
    }

    #[test]
    fn test_spatial_operator() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();
        let params = OperatorAudioParams {
            spatial: Some(OperatorSpatialParams {
                position: Vec3::new(3.0, 0.0, 0.0),
                ..Default::default()
            }),
            ..Default::default()
        };

        player.update_operator(&f.graph, &f.config, 4, "a.wav", &params);
        match player.state(4).unwrap().stream() {
            Some(OperatorStream::Spatial(spatial)) => assert_eq!(spatial.position().x, 3.0),
            _ => panic!("expected spatial stream"),
        }
    }

    #[test]
    fn test_missing_file_leaves_no_stream() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();
        player.update_operator(&f.graph, &f.config, 5, "missing.wav", &playing());
        assert!(!player.state(5).unwrap().has_stream());
        assert_eq!(player.level(5), 0.0);
        assert!(f.dir.path().exists());
    }

    #[test]
    fn test_unregister_and_stop_all() {
        let f = Fixture::new();
        let mut player = OperatorAudioPlayer::new();
        player.update_operator(&f.graph, &f.config, 1, "a.wav", &playing());
        player.update_operator(&f.graph, &f.config, 2, "b.wav", &playing());

        player.stop_all();
        let handle = player.state(1).unwrap().stream().unwrap().stream().handle();
        assert_eq!(f.backend.state(handle), ChannelState::Stopped);

        assert!(player.unregister_operator(1));
        assert!(!player.unregister_operator(1));
        assert_eq!(player.len(), 1);
        assert!(f.backend.channel_info(handle).is_err());
    }
}
