//! Mixer graph: device plus the three permanent routing nodes
//!
//! ```text
//!   Operator (decode-only) ──┐
//!                            ├──▶ Global ──▶ device
//!   Soundtrack (decode-only) ┘
//! ```
//!
//! Nodes are created once by `initialize` and freed once by `shutdown`.

use std::sync::Arc;

use sf_backend::{AudioBackend, ChannelAttribute, ChannelHandle, GlobalOption};
use sf_core::AudioConfig;

use crate::{AudioError, AudioResult};

/// Routing node of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixerNode {
    /// Device-facing mix
    Global,
    /// Programmatically triggered sounds
    Operator,
    /// Timeline clips
    Soundtrack,
}

/// Handles of the three nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerNodes {
    pub global: ChannelHandle,
    pub operator: ChannelHandle,
    pub soundtrack: ChannelHandle,
}

impl MixerNodes {
    pub fn get(&self, node: MixerNode) -> ChannelHandle {
        match node {
            MixerNode::Global => self.global,
            MixerNode::Operator => self.operator,
            MixerNode::Soundtrack => self.soundtrack,
        }
    }
}

/// Owns device initialization and the fixed node topology
pub struct MixerGraph {
    backend: Arc<dyn AudioBackend>,
    nodes: Option<MixerNodes>,
}

impl MixerGraph {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            nodes: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn is_initialized(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn nodes(&self) -> Option<MixerNodes> {
        self.nodes
    }

    pub fn node(&self, node: MixerNode) -> Option<ChannelHandle> {
        self.nodes.map(|n| n.get(node))
    }

    /// Initialize the device (if needed) and build the graph.
    ///
    /// Idempotent. On failure nothing stays allocated and the call may be retried.
    pub fn initialize(&mut self, config: &AudioConfig) -> AudioResult<()> {
        if self.nodes.is_some() {
            return Ok(());
        }

        let device_created = if self.backend.is_device_initialized() {
            false
        } else {
            self.backend
                .init_device(config.mixer_sample_rate, config.mixer_channels)
                .map_err(|e| {
                    log::error!("[MixerGraph] Device initialization failed: {}", e);
                    AudioError::DeviceInit(e.to_string())
                })?;
            true
        };

        match self.build(config) {
            Ok(nodes) => {
                self.nodes = Some(nodes);
                log::info!(
                    "[MixerGraph] Initialized: {} Hz, {} channels (global {}, operator {}, soundtrack {})",
                    config.mixer_sample_rate,
                    config.mixer_channels,
                    nodes.global,
                    nodes.operator,
                    nodes.soundtrack
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[MixerGraph] Initialization failed: {}", e);
                if device_created {
                    if let Err(free) = self.backend.free_device() {
                        log::warn!("[MixerGraph] Failed to release device: {}", free);
                    }
                }
                Err(e)
            }
        }
    }

    fn build(&self, config: &AudioConfig) -> AudioResult<MixerNodes> {
        let backend = &self.backend;
        backend.set_option(GlobalOption::UpdatePeriodMs, config.update_period_ms as f64)?;
        backend.set_option(GlobalOption::UpdateThreads, config.update_threads as f64)?;
        backend.set_option(GlobalOption::GlobalStreamVolume, config.global_volume as f64)?;

        let mut created = Vec::with_capacity(3);
        let result = self.create_nodes(config, &mut created);
        if result.is_err() {
            for handle in created.into_iter().rev() {
                let _ = backend.free_channel(handle);
            }
        }
        result
    }

    fn create_nodes(
        &self,
        config: &AudioConfig,
        created: &mut Vec<ChannelHandle>,
    ) -> AudioResult<MixerNodes> {
        let backend = &self.backend;
        let rate = config.mixer_sample_rate;
        let channels = config.mixer_channels;

        let global = backend.create_mixer(rate, channels, false)?;
        created.push(global);
        let operator = backend.create_mixer(rate, channels, true)?;
        created.push(operator);
        let soundtrack = backend.create_mixer(rate, channels, true)?;
        created.push(soundtrack);

        backend.attach(global, operator)?;
        backend.attach(global, soundtrack)?;
        backend.play(global, false)?;

        Ok(MixerNodes {
            global,
            operator,
            soundtrack,
        })
    }

    /// Free the nodes (reverse order) and release the device. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(nodes) = self.nodes.take() else {
            return;
        };

        for handle in [nodes.soundtrack, nodes.operator, nodes.global] {
            if let Err(e) = self.backend.free_channel(handle) {
                log::warn!("[MixerGraph] Failed to free node {}: {}", handle, e);
            }
        }

        if self.backend.is_device_initialized() {
            if let Err(e) = self.backend.free_device() {
                log::warn!("[MixerGraph] Failed to release device: {}", e);
            }
        }

        log::info!("[MixerGraph] Shut down");
    }

    /// Set the gain of one node. No-op before `initialize`.
    pub fn set_volume(&self, node: MixerNode, value: f32) {
        let Some(handle) = self.node(node) else {
            return;
        };
        if let Err(e) = self
            .backend
            .set_attribute(handle, ChannelAttribute::Volume, value)
        {
            log::warn!("[MixerGraph] Failed to set {:?} volume: {}", node, e);
        }
    }
}

impl Drop for MixerGraph {
    fn drop(&mut self) {
        self.shutdown();
    }
}
