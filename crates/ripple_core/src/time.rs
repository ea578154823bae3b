//! Frame clock
//!
//! Counts frames, tracks the warm-up window and accumulates simulated time.

#[derive(Debug, Clone)]
pub struct FrameClock {
    frame: u64,
    warmup_frames: u64,
    simulated_time: f64,
}

impl FrameClock {
    pub fn new(warmup_frames: u64) -> Self {
        Self {
            frame: 0,
            warmup_frames,
            simulated_time: 0.0,
        }
    }

    /// Index of the frame about to run.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The frame about to run only renders.
    pub fn in_warmup(&self) -> bool {
        self.frame < self.warmup_frames
    }

    /// Close the current frame; `dt` is zero for warm-up frames.
    pub fn advance(&mut self, dt: f32) {
        self.frame += 1;
        self.simulated_time += dt as f64;
    }

    /// Seconds of simulation integrated so far.
    pub fn simulated_time(&self) -> f64 {
        self.simulated_time
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_window() {
        let mut clock = FrameClock::new(2);
        assert!(clock.in_warmup());
        clock.advance(0.0);
        assert!(clock.in_warmup());
        clock.advance(0.0);
        assert!(!clock.in_warmup());
        clock.advance(0.5);
        assert_eq!(clock.frame(), 3);
        assert_eq!(clock.simulated_time(), 0.5);
    }
}
