//! Export source registry
//!
//! Components that can render audio for an arbitrary time window register
//! here; the export mixdown merges their output additively. The registry holds
//! only weak references: registrants own their sources.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::{AudioResult, mix_into};

// ═══════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════

/// Component that contributes audio to an export mixdown
pub trait ExportSource: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Render `duration` seconds starting at `start_time` into `buffer`
    /// (interleaved float, mixer channel layout, pre-zeroed).
    ///
    /// Returns the number of samples written; the caller zero-fills the rest.
    fn render_audio(&self, start_time: f64, duration: f64, buffer: &mut [f32])
    -> AudioResult<usize>;

    /// Optional metering hook, fed with every rendered export block
    fn metering(&self) -> Option<&dyn MeteringSource> {
        None
    }
}

/// Sources that keep meters in sync with exported audio
pub trait MeteringSource {
    fn update_meter(&self, rendered: &[f32]);
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Thread-safe set of export sources with copy-on-read enumeration
#[derive(Default)]
pub struct ExportSourceRegistry {
    sources: Mutex<Vec<Weak<dyn ExportSource>>>,
}

fn same_source(weak: &Weak<dyn ExportSource>, source: &Arc<dyn ExportSource>) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(source))
}

impl ExportSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source (no-op if already registered)
    pub fn register(&self, source: &Arc<dyn ExportSource>) {
        let mut sources = self.sources.lock();
        sources.retain(|w| w.strong_count() > 0);
        if sources.iter().any(|w| same_source(w, source)) {
            return;
        }
        sources.push(Arc::downgrade(source));
        log::debug!("[ExportSourceRegistry] Registered {}", source.name());
    }

    /// Remove a source (no-op if absent)
    pub fn unregister(&self, source: &Arc<dyn ExportSource>) {
        self.sources
            .lock()
            .retain(|w| w.strong_count() > 0 && !same_source(w, source));
    }

    pub fn clear(&self) {
        self.sources.lock().clear();
    }

    /// Snapshot of the live sources; later registry changes don't affect it
    pub fn sources(&self) -> Vec<Arc<dyn ExportSource>> {
        let mut sources = self.sources.lock();
        sources.retain(|w| w.strong_count() > 0);
        sources.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live sources
    pub fn len(&self) -> usize {
        self.sources
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render every source into a scratch buffer and add it to `output`.
///
/// A failing source is logged and contributes silence.
pub fn mix_export_sources(
    sources: &[Arc<dyn ExportSource>],
    start_time: f64,
    duration: f64,
    output: &mut [f32],
) {
    let mut scratch = vec![0.0f32; output.len()];
    for source in sources {
        scratch.iter_mut().for_each(|s| *s = 0.0);
        match source.render_audio(start_time, duration, &mut scratch) {
            Ok(written) => {
                let written = written.min(scratch.len());
                scratch[written..].iter_mut().for_each(|s| *s = 0.0);
                mix_into(output, &scratch, 1.0);
                if let Some(meter) = source.metering() {
                    meter.update_meter(&scratch[..written]);
                }
            }
            Err(e) => {
                log::warn!(
                    "[ExportPipeline] Export source {} failed at {:.3}s: {}",
                    source.name(),
                    start_time,
                    e
                );
            }
        }
    }
}
