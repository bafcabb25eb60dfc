//! sf-engine: Audio mixing, clip streaming and deterministic export
//!
//! Built on the handle-based [`sf_backend::AudioBackend`] capability.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!  host ─────────▶ │ AudioEngine (per frame)      │
//!  use_clip()      │  - ClipStream per clip       │
//!  complete_frame()│  - primary soundtrack        │
//!                  │  - OperatorAudioPlayer       │
//!                  └──────────────┬───────────────┘
//!                                 │
//!        ┌────────────────────────┼─────────────────────────┐
//!        ▼                        ▼                         ▼
//!  ┌───────────┐         ┌─────────────────┐      ┌──────────────────────┐
//!  │MixerGraph │         │ ExportPipeline  │      │ ExportSourceRegistry │
//!  │ global    │         │ - FIFO capture  │◀─────│ (weak, non-owning)   │
//!  │ ├ operator│         │ - stateless mix │      └──────────────────────┘
//!  │ └ soundtr.│         └─────────────────┘
//!  └───────────┘
//! ```
//!
//! Live playback follows the host timeline loosely (drift corrected past a
//! tolerance). Export is frame-locked: every exported frame carries exactly
//! `frame_duration` worth of samples.

mod analysis;
mod clip_stream;
mod engine;
mod error;
mod export;
mod fifo;
mod mixer_graph;
mod operator;
mod registry;
mod resample;
mod spatial;

pub use analysis::*;
pub use clip_stream::*;
pub use engine::*;
pub use error::*;
pub use export::*;
pub use fifo::*;
pub use mixer_graph::*;
pub use operator::*;
pub use registry::*;
pub use resample::*;
pub use spatial::*;
