//! sf-backend: Native audio backend capability
//!
//! The audio engine talks to device I/O, decoding and mixing only through the
//! [`AudioBackend`] trait: a handle-based, synchronous and fallible API in the
//! style of native mixer libraries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │ sf-engine    │────▶│ dyn AudioBackend │────▶│ device       │
//! │              │     │                  │     │ (cpal/null)  │
//! │ - mixer graph│     │ - streams        │     │              │
//! │ - clips      │     │ - mixer nodes    │     │              │
//! │ - export     │     │ - 3D attributes  │     │              │
//! └──────────────┘     └──────────────────┘     └──────────────┘
//! ```
//!
//! [`SoftwareBackend`] is a pure-Rust implementation: files are decoded with
//! symphonia, mixer nodes sum their inputs on pull, and the device-facing
//! mixer is rendered by `update()` (optionally into a cpal output stream with
//! the `device-output` feature).

mod backend;
mod decode;
mod error;
mod software;

#[cfg(feature = "device-output")]
mod device;

pub use backend::*;
pub use decode::*;
pub use error::*;
pub use software::*;
