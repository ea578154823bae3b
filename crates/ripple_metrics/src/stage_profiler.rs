//! Smoothed timings for named pipeline stages

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct StageTiming {
    name: &'static str,
    window: RingBuffer<Duration>,
    total: Duration,
}

/// Keeps a rolling window and a running total per stage, in first-seen order.
#[derive(Debug)]
pub struct StageProfiler {
    window: usize,
    stages: Vec<StageTiming>,
}

impl StageProfiler {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            stages: Vec::new(),
        }
    }

    pub fn time_stage<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(name, start.elapsed());
        result
    }

    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        let window = self.window;
        let stage = match self.stages.iter().position(|s| s.name == name) {
            Some(idx) => &mut self.stages[idx],
            None => {
                self.stages.push(StageTiming {
                    name,
                    window: RingBuffer::new(window),
                    total: Duration::ZERO,
                });
                let last = self.stages.len() - 1;
                &mut self.stages[last]
            }
        };
        stage.window.push(elapsed);
        stage.total += elapsed;
    }

    pub fn average_ms(&self, name: &str) -> f64 {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.window.average().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn total(&self, name: &str) -> Duration {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.total)
            .unwrap_or(Duration::ZERO)
    }

    /// `(stage, rolling average ms)` pairs in first-seen order.
    pub fn summary(&self) -> Vec<(&'static str, f64)> {
        self.stages
            .iter()
            .map(|s| (s.name, s.window.average().as_secs_f64() * 1000.0))
            .collect()
    }
}

impl Default for StageProfiler {
    fn default() -> Self {
        Self::new(60)
    }
}
