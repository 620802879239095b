//! Fixed-timestep accumulator.
//!
//! Wall-clock time is accumulated; every whole step in the accumulator is one
//! simulation update, and whatever is left over becomes the interpolation
//! weight for rendering.

use std::time::Duration;

/// Result of feeding elapsed time into a [`FixedStep`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPlan {
    /// Simulation updates to run now.
    pub updates: u32,
    /// Fraction of a step left in the accumulator, in $[0,1)$.
    pub weight: f32,
}

#[derive(Debug, Clone)]
pub struct FixedStep {
    step: Duration,
    accumulator: Duration,
}

impl FixedStep {
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_micros(1)),
            accumulator: Duration::ZERO,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(hz.max(1))))
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn advance(&mut self, elapsed: Duration) -> StepPlan {
        self.accumulator += elapsed;
        let mut updates = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            updates += 1;
        }
        StepPlan {
            updates,
            weight: self.weight(),
        }
    }

    pub fn weight(&self) -> f32 {
        (self.accumulator.as_secs_f64() / self.step.as_secs_f64()) as f32
    }
}
