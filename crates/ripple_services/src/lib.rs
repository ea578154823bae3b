//! Ripple Services Layer
//!
//! Run settings on disk and per-frame telemetry sinks.

pub mod settings;
pub mod telemetry;

pub use settings::{BackendKind, RunSettings, SceneKind, SettingsError};
pub use telemetry::DensityCsvSink;
