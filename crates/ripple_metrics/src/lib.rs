//! Ripple Metrics - rolling timers and counters for the solver loop
//!
//! Provides the instrumentation the orchestrator owns through its
//! `PerformanceStats`: frame timing, per-stage timing and named counters.
//! Everything here is plain owned state, nothing is process-global.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use ripple_metrics::{FrameTimer, StageProfiler};
//!
//! let mut timer = FrameTimer::new(60); // Track last 60 frames
//! let mut stages = StageProfiler::new(60);
//! timer.begin();
//! stages.time_stage("neighbors", || build_neighbor_lists());
//! timer.end();
//! println!("FPS: {:.1}", timer.fps());
//! ```
//!
//! Without the `metrics` feature every type below is a zero-sized stub and
//! the instrumentation compiles away.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod ring_buffer;
#[cfg(feature = "metrics")]
mod stage_profiler;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;
#[cfg(feature = "metrics")]
pub use stage_profiler::StageProfiler;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn fps(&self) -> f64 { 0.0 }
    pub fn frame_time_ms(&self) -> f64 { 0.0 }
    pub fn frame_time_range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
    pub fn frames_recorded(&self) -> u64 { 0 }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug)]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
    pub fn len(&self) -> usize { 0 }
    pub fn is_empty(&self) -> bool { true }
    pub fn average(&self) -> T where T: Default { T::default() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn set(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn reset_all(&mut self) {}
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ { std::iter::empty() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct StageProfiler;

#[cfg(not(feature = "metrics"))]
impl StageProfiler {
    pub fn new(_window: usize) -> Self { Self }
    pub fn time_stage<F, R>(&mut self, _name: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn record(&mut self, _name: &'static str, _elapsed: std::time::Duration) {}
    pub fn average_ms(&self, _name: &str) -> f64 { 0.0 }
    pub fn total(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn summary(&self) -> Vec<(&'static str, f64)> { Vec::new() }
}
