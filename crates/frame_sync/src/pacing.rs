//! Frame pacing and the engine step accumulator

use std::thread;
use std::time::Duration;

use observability::FrameTimingAggregator;
use tracing::info;

use crate::{FrameOutcome, StepStatus};

/// Sleeps out the remainder of each frame and logs timing periodically
#[derive(Debug)]
pub struct FrameClock {
    instance_id: String,
    interval: Duration,
    log_every: u64,
    timing: FrameTimingAggregator,
}

impl FrameClock {
    pub fn new(instance_id: impl Into<String>, frame_rate: u32) -> Self {
        let frame_rate = frame_rate.max(1);
        Self {
            instance_id: instance_id.into(),
            interval: Duration::from_secs_f64(1.0 / f64::from(frame_rate)),
            log_every: u64::from(frame_rate),
            timing: FrameTimingAggregator::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left in the frame after `elapsed` of work
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.interval.saturating_sub(elapsed)
    }

    /// Account for a finished frame and sleep until the next one is due.
    ///
    /// Returns the slept duration.
    pub fn finish_frame(&mut self, outcome: &FrameOutcome) -> Duration {
        self.record(outcome);
        let pause = self.remaining(outcome.elapsed);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        pause
    }

    fn record(&mut self, outcome: &FrameOutcome) {
        if outcome.status == StepStatus::TimedOut {
            self.timing.record_timeout();
        }
        self.timing.record_frame(
            outcome.elapsed.as_secs_f64() * 1000.0,
            outcome.commands_executed,
        );

        if self.timing.total_frames % self.log_every == 0 {
            let window = self.timing.take_window();
            info!(
                instance = %self.instance_id,
                frame = outcome.frame_id,
                frame_time_ms = %window,
                "Frame timing"
            );
        }
    }

    pub fn timing(&self) -> &FrameTimingAggregator {
        &self.timing
    }
}

/// Converts wall-clock frame time into whole engine steps
#[derive(Debug, Clone)]
pub struct StepAccumulator {
    step_length: f64,
    accumulated: f64,
}

impl StepAccumulator {
    const EPSILON: f64 = 1e-9;

    pub fn new(step_length: f64) -> Self {
        Self {
            step_length,
            accumulated: 0.0,
        }
    }

    pub fn step_length(&self) -> f64 {
        self.step_length
    }

    /// Add `dt` seconds; returns how many steps of `step_length` are due
    pub fn advance(&mut self, dt: f64) -> u32 {
        if self.step_length <= 0.0 {
            return 0;
        }
        self.accumulated += dt;
        let mut steps = 0;
        while self.accumulated + Self::EPSILON >= self.step_length {
            self.accumulated -= self.step_length;
            steps += 1;
        }
        steps
    }
}
