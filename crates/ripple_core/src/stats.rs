//! Performance statistics owned by the solver
//!
//! Frame timing, per-stage timing and cumulative counters come from
//! `ripple_metrics` and compile away without the `metrics` feature. The last
//! frame's [`FrameDiagnostics`] are always kept.

use ripple_metrics::{Counter, FrameTimer, StageProfiler};

/// Capacity and clamp events observed during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDiagnostics {
    pub particles: u32,
    /// Grid insertions dropped because their bucket was full.
    pub bucket_overflows: u64,
    /// Particles whose neighbor list hit `max_neighbors`.
    pub truncated_neighbor_lists: u64,
    /// Particles whose XSPH weights were renormalized.
    pub viscosity_clamps: u64,
}

impl FrameDiagnostics {
    /// Fraction of particles that lost neighbors, to a full list or a full bucket.
    pub fn truncation_ratio(&self) -> f64 {
        if self.particles == 0 {
            return 0.0;
        }
        let affected = (self.truncated_neighbor_lists + self.bucket_overflows).min(self.particles as u64);
        affected as f64 / self.particles as f64
    }
}

pub const COUNTER_FRAMES: &str = "frames";
pub const COUNTER_WARMUP_FRAMES: &str = "warmup_frames";
pub const COUNTER_BUCKET_OVERFLOWS: &str = "bucket_overflows";
pub const COUNTER_TRUNCATED_LISTS: &str = "truncated_neighbor_lists";
pub const COUNTER_VISCOSITY_CLAMPS: &str = "viscosity_clamps";
pub const COUNTER_DISPATCHES: &str = "dispatches";

#[derive(Debug, Default)]
pub struct PerformanceStats {
    frame_timer: FrameTimer,
    stages: StageProfiler,
    counters: Counter,
    last_frame: FrameDiagnostics,
    frame_count: u64,
}

impl PerformanceStats {
    pub fn new(window: usize) -> Self {
        Self {
            frame_timer: FrameTimer::new(window),
            stages: StageProfiler::new(window),
            counters: Counter::new(),
            last_frame: FrameDiagnostics::default(),
            frame_count: 0,
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame_timer.begin();
    }

    pub fn end_frame(&mut self, warmup: bool) {
        self.frame_timer.end();
        self.frame_count += 1;
        self.counters.increment(COUNTER_FRAMES, 1);
        if warmup {
            self.counters.increment(COUNTER_WARMUP_FRAMES, 1);
        }
    }

    pub fn record_diagnostics(&mut self, diagnostics: FrameDiagnostics) {
        self.counters
            .increment(COUNTER_BUCKET_OVERFLOWS, diagnostics.bucket_overflows);
        self.counters
            .increment(COUNTER_TRUNCATED_LISTS, diagnostics.truncated_neighbor_lists);
        self.counters
            .increment(COUNTER_VISCOSITY_CLAMPS, diagnostics.viscosity_clamps);
        self.last_frame = diagnostics;
    }

    pub fn record_dispatches(&mut self, count: u64) {
        self.counters.increment(COUNTER_DISPATCHES, count);
    }

    pub(crate) fn stages_mut(&mut self) -> &mut StageProfiler {
        &mut self.stages
    }

    /// Frames completed, warm-up included. Independent of the metrics feature.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn last_frame(&self) -> &FrameDiagnostics {
        &self.last_frame
    }

    pub fn fps(&self) -> f64 {
        self.frame_timer.fps()
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.frame_timer.frame_time_ms()
    }

    pub fn stage_summary(&self) -> Vec<(&'static str, f64)> {
        self.stages.summary()
    }

    /// Cumulative value of a named counter; zero without the metrics feature.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_ratio() {
        let d = FrameDiagnostics {
            particles: 10,
            bucket_overflows: 1,
            truncated_neighbor_lists: 2,
            viscosity_clamps: 7,
        };
        assert!((d.truncation_ratio() - 0.3).abs() < 1e-12);
        assert_eq!(FrameDiagnostics::default().truncation_ratio(), 0.0);
    }

    #[test]
    fn test_last_frame_and_frame_count() {
        let mut stats = PerformanceStats::new(8);
        stats.begin_frame();
        stats.record_diagnostics(FrameDiagnostics {
            particles: 4,
            viscosity_clamps: 2,
            ..FrameDiagnostics::default()
        });
        stats.end_frame(false);
        assert_eq!(stats.frame_count(), 1);
        assert_eq!(stats.last_frame().viscosity_clamps, 2);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_counters_accumulate() {
        let mut stats = PerformanceStats::new(8);
        for _ in 0..3 {
            stats.begin_frame();
            stats.record_diagnostics(FrameDiagnostics {
                particles: 4,
                bucket_overflows: 2,
                ..FrameDiagnostics::default()
            });
            stats.end_frame(false);
        }
        assert_eq!(stats.counter(COUNTER_BUCKET_OVERFLOWS), 6);
        assert_eq!(stats.counter(COUNTER_FRAMES), 3);
    }
}
