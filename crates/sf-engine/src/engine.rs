//! Audio Engine - per-frame orchestrator
//!
//! Once per frame the host declares which clips are in use (`use_clip`) and
//! calls `complete_frame`. The engine then:
//! 1. Lazily initializes the mixer graph
//! 2. Feeds the analysis from the current primary soundtrack (live playback)
//! 3. Creates streams for newly requested clips, updates the others
//! 4. Picks the primary soundtrack, drives its transport or export capture,
//!    pauses or marks unused streams
//! 5. Tears down marked streams and clears the frame's requests

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use sf_backend::{AudioBackend, GlobalOption, Listener3d};
use sf_core::{AudioConfig, ClipIdentity, ClipResource, Playback, Vec3};

use crate::{
    AudioAnalysis, AudioResult, ClipStream, ExportPipeline, ExportSourceRegistry, MixerGraph,
    MixerNode, OperatorAudioParams, OperatorAudioPlayer,
};

/// Stream of one requested clip
struct ActiveClip {
    resource: ClipResource,
    path: PathBuf,
    stream: ClipStream,
    /// Creation order, breaks primary-soundtrack ties
    sequence: u64,
}

/// Per-frame audio orchestrator
pub struct AudioEngine {
    config: AudioConfig,
    backend: Arc<dyn AudioBackend>,
    clips: HashMap<ClipIdentity, ActiveClip>,
    /// This frame's requests, in request order
    requests: Vec<(ClipResource, f64)>,
    next_sequence: u64,
    primary: Option<ClipIdentity>,
    export: ExportPipeline,
    operators: OperatorAudioPlayer,
    analysis: AudioAnalysis,
    registry: Arc<ExportSourceRegistry>,
    soundtrack_muted: bool,
    operators_muted: bool,
    // Dropped last: streams above must be freed before the graph shuts down
    graph: MixerGraph,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: AudioConfig) -> Self {
        Self {
            analysis: AudioAnalysis::from_config(&config),
            graph: MixerGraph::new(Arc::clone(&backend)),
            config,
            backend,
            clips: HashMap::new(),
            requests: Vec::new(),
            next_sequence: 0,
            primary: None,
            export: ExportPipeline::new(),
            operators: OperatorAudioPlayer::new(),
            registry: Arc::new(ExportSourceRegistry::new()),
            soundtrack_muted: false,
            operators_muted: false,
        }
    }

    /// Share an existing export source registry
    pub fn with_registry(mut self, registry: Arc<ExportSourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ExportSourceRegistry> {
        &self.registry
    }

    pub fn analysis(&self) -> &AudioAnalysis {
        &self.analysis
    }

    pub fn export(&self) -> &ExportPipeline {
        &self.export
    }

    pub fn is_initialized(&self) -> bool {
        self.graph.is_initialized()
    }

    /// Build the mixer graph (idempotent). Called lazily by `complete_frame`.
    pub fn initialize(&mut self) -> AudioResult<()> {
        if self.graph.is_initialized() {
            return Ok(());
        }
        self.graph.initialize(&self.config)?;
        self.graph.set_volume(
            MixerNode::Soundtrack,
            if self.soundtrack_muted { 0.0 } else { 1.0 },
        );
        self.graph.set_volume(
            MixerNode::Operator,
            if self.operators_muted { 0.0 } else { 1.0 },
        );
        Ok(())
    }

    /// Release every stream, then the graph and the device
    pub fn shutdown(&mut self) {
        self.clips.clear();
        self.requests.clear();
        self.operators.clear();
        self.analysis.clear();
        self.export = ExportPipeline::new();
        self.primary = None;
        self.graph.shutdown();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FRAME
    // ═══════════════════════════════════════════════════════════════════════

    /// Declare that `resource` is in use this frame at timeline `time`
    pub fn use_clip(&mut self, resource: &ClipResource, time: f64) {
        match self.requests.iter_mut().find(|(r, _)| r.id == resource.id) {
            Some(request) => *request = (resource.clone(), time),
            None => self.requests.push((resource.clone(), time)),
        }
    }

    /// Run the per-frame state machine
    pub fn complete_frame(&mut self, playback: &Playback, frame_duration: f64) {
        let requests = std::mem::take(&mut self.requests);

        if self.initialize().is_err() {
            return;
        }

        let exporting = playback.is_rendering_to_file;

        if !exporting && playback.captures_soundtrack() {
            self.capture_live_analysis();
        }

        let in_use = self.update_streams(requests);
        self.primary = self.pick_primary(&in_use);

        let mut teardown = Vec::new();
        let tolerance = self.config.sync_tolerance_secs;

        for (id, active) in self.clips.iter_mut() {
            let used = in_use.contains(id);
            active.stream.set_in_use(used);

            if !used {
                if active.resource.discard_after_use {
                    teardown.push(id.clone());
                } else {
                    active.stream.pause();
                }
                continue;
            }

            if !exporting {
                active.stream.set_playback_speed(playback.playback_speed);
            }

            let is_primary = self.primary.as_ref() == Some(id);
            if is_primary && exporting {
                let analysis = playback
                    .captures_soundtrack()
                    .then_some(&mut self.analysis);
                self.export.capture_frame(
                    id,
                    &mut active.stream,
                    active.resource.start_time,
                    playback.time_in_secs,
                    frame_duration,
                    analysis,
                );
            } else if exporting {
                // Secondary streams stay parked; the stateless mixdown covers them
            } else if is_primary || !active.resource.is_soundtrack {
                let local = active
                    .resource
                    .local_time(active.stream.target_time_secs());
                active
                    .stream
                    .update_live_playback(local, playback.playback_speed, tolerance);
            } else {
                active.stream.pause();
            }
        }

        for id in teardown {
            if self.clips.remove(&id).is_some() {
                log::debug!("[AudioEngine] Released {}", id);
            }
        }
    }

    fn capture_live_analysis(&mut self) {
        let Some(active) = self.primary.as_ref().and_then(|id| self.clips.get(id)) else {
            return;
        };
        let channels = active.stream.info().channels as usize;
        if let Some(samples) = active.stream.capture(self.analysis.fft_size()) {
            self.analysis.process_interleaved(&samples, channels);
        }
    }

    /// Create or update the stream of every request; returns the in-use set
    fn update_streams(&mut self, requests: Vec<(ClipResource, f64)>) -> HashSet<ClipIdentity> {
        let mut in_use = HashSet::with_capacity(requests.len());

        for (resource, time) in requests {
            let path = resource.resolve_path(self.config.resource_root.as_deref());
            in_use.insert(resource.id.clone());

            if let Some(active) = self.clips.get_mut(&resource.id) {
                if active.path == path {
                    active.stream.set_target_time(time);
                    if active.resource.volume != resource.volume {
                        active.stream.set_volume(resource.volume, false);
                    }
                    active.resource = resource;
                    continue;
                }
                log::info!(
                    "[AudioEngine] {} changed file to {}, reloading",
                    resource.id,
                    path.display()
                );
                self.clips.remove(&resource.id);
            }

            let bus = if resource.is_soundtrack {
                MixerNode::Soundtrack
            } else {
                MixerNode::Operator
            };
            let Some(bus) = self.graph.node(bus) else {
                continue;
            };

            // Failures are logged by the loader; other clips carry on
            let Ok(mut stream) = ClipStream::try_load(&self.backend, &path, bus) else {
                continue;
            };
            stream.set_target_time(time);
            stream.set_volume(resource.volume, false);

            let sequence = self.next_sequence;
            self.next_sequence += 1;
            log::debug!("[AudioEngine] Created stream for {}", resource.id);
            self.clips.insert(
                resource.id.clone(),
                ActiveClip {
                    resource,
                    path,
                    stream,
                    sequence,
                },
            );
        }

        in_use
    }

    /// In-use soundtrack with the lowest start time, then the oldest stream
    fn pick_primary(&self, in_use: &HashSet<ClipIdentity>) -> Option<ClipIdentity> {
        self.clips
            .iter()
            .filter(|(id, active)| active.resource.is_soundtrack && in_use.contains(*id))
            .min_by(|a, b| {
                a.1.resource
                    .start_time
                    .total_cmp(&b.1.resource.start_time)
                    .then(a.1.sequence.cmp(&b.1.sequence))
            })
            .map(|(id, _)| id.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Enter frame-locked recording at `fps`
    pub fn prepare_recording(&mut self, fps: f64) {
        if self.initialize().is_err() {
            return;
        }
        let streams = self
            .clips
            .values_mut()
            .filter(|a| a.resource.is_soundtrack)
            .map(|a| &mut a.stream);
        self.export
            .prepare_recording(self.backend.as_ref(), fps, streams);
    }

    /// Leave recording and restore live settings (idempotent)
    pub fn end_recording(&mut self) {
        let streams = self
            .clips
            .values_mut()
            .filter(|a| a.resource.is_soundtrack)
            .map(|a| &mut a.stream);
        self.export
            .end_recording(self.backend.as_ref(), &self.config, streams);
    }

    /// Drain the primary soundtrack's captured frame as float samples
    pub fn get_last_mix_down_buffer(&mut self) -> Vec<f32> {
        self.export.take_mix_down_f32()
    }

    /// Drain one clip's captured frame as native bytes
    pub fn take_frame(&mut self, id: &ClipIdentity) -> Vec<u8> {
        self.export.take_frame(id)
    }

    /// Stateless mixdown of `clips` plus every registered export source
    pub fn get_full_mix_down_buffer(
        &mut self,
        clips: &[ClipResource],
        frame_duration: f64,
        time: f64,
    ) -> Vec<f32> {
        // Decode streams need an initialized device; a failure leaves silence
        let _ = self.initialize();
        let sources = self.registry.sources();
        ExportPipeline::get_full_mix_down_buffer(
            self.backend.as_ref(),
            &self.config,
            clips,
            &sources,
            frame_duration,
            time,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLIPS
    // ═══════════════════════════════════════════════════════════════════════

    /// Tear down one clip's stream now
    pub fn unregister_clip(&mut self, id: &ClipIdentity) -> bool {
        self.requests.retain(|(r, _)| &r.id != id);
        if self.primary.as_ref() == Some(id) {
            self.primary = None;
        }
        self.clips.remove(id).is_some()
    }

    pub fn primary_clip(&self) -> Option<&ClipIdentity> {
        self.primary.as_ref()
    }

    pub fn has_clip(&self, id: &ClipIdentity) -> bool {
        self.clips.contains_key(id)
    }

    pub fn clip_stream(&self, id: &ClipIdentity) -> Option<&ClipStream> {
        self.clips.get(id).map(|a| &a.stream)
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    /// Meter level of every active clip, sorted by identity
    pub fn clip_levels(&self) -> Vec<(ClipIdentity, f32)> {
        let mut levels: Vec<_> = self
            .clips
            .iter()
            .map(|(id, a)| (id.clone(), a.stream.get_level()))
            .collect();
        levels.sort_by(|a, b| a.0.cmp(&b.0));
        levels
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OPERATORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn update_operator(
        &mut self,
        operator_id: u64,
        file_path: &str,
        params: &OperatorAudioParams,
    ) {
        if self.initialize().is_err() {
            return;
        }
        self.operators
            .update_operator(&self.graph, &self.config, operator_id, file_path, params);
    }

    pub fn unregister_operator(&mut self, operator_id: u64) -> bool {
        self.operators.unregister_operator(operator_id)
    }

    pub fn stop_all_operators(&mut self) {
        self.operators.stop_all();
    }

    pub fn operator_level(&self, operator_id: u64) -> f32 {
        self.operators.level(operator_id)
    }

    pub fn operators(&self) -> &OperatorAudioPlayer {
        &self.operators
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GLOBAL CONTROLS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_listener(&mut self, position: Vec3, velocity: Vec3, forward: Vec3, up: Vec3) {
        let listener = Listener3d {
            position,
            velocity,
            front: forward.normalize(),
            top: up.normalize(),
        };
        match self.backend.set_listener(&listener) {
            Ok(()) => self.backend.apply_3d(),
            Err(e) => log::warn!("[AudioEngine] Failed to set listener: {}", e),
        }
    }

    pub fn set_global_volume(&mut self, volume: f32) {
        self.config.global_volume = volume.max(0.0);
        if let Err(e) = self.backend.set_option(
            GlobalOption::GlobalStreamVolume,
            self.config.global_volume as f64,
        ) {
            log::warn!("[AudioEngine] Failed to set global volume: {}", e);
        }
    }

    pub fn set_soundtrack_mute(&mut self, mute: bool) {
        self.soundtrack_muted = mute;
        self.graph
            .set_volume(MixerNode::Soundtrack, if mute { 0.0 } else { 1.0 });
    }

    pub fn set_operator_mute(&mut self, mute: bool) {
        self.operators_muted = mute;
        self.graph
            .set_volume(MixerNode::Operator, if mute { 0.0 } else { 1.0 });
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
