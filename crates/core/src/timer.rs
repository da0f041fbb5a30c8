//! Frame timing.
//!
//! [`Timer`] measures wall-clock delta time between ticks. A timer built with
//! [`Timer::fixed_step`] reports the same delta on every tick instead, which
//! makes headless runs reproducible.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    fixed_step: Option<Duration>,
    ticks: u64,
}

impl Timer {
    /// Create a new wall-clock timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            fixed_step: None,
            ticks: 0,
        }
    }

    /// Create a timer whose every tick reports `step`.
    pub fn fixed_step(step: Duration) -> Self {
        Self {
            fixed_step: Some(step),
            ..Self::new()
        }
    }

    #[inline]
    pub fn is_fixed_step(&self) -> bool {
        self.fixed_step.is_some()
    }

    /// Total time since creation. For a fixed-step timer this is the
    /// simulated time, `ticks * step`.
    pub fn elapsed(&self) -> Duration {
        match self.fixed_step {
            Some(step) => step.saturating_mul(u32::try_from(self.ticks).unwrap_or(u32::MAX)),
            None => self.start.elapsed(),
        }
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        self.ticks += 1;
        if let Some(step) = self.fixed_step {
            return step;
        }
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.ticks = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_step_is_deterministic() {
        let step = Duration::from_millis(16);
        let mut timer = Timer::fixed_step(step);
        assert!(timer.is_fixed_step());
        for _ in 0..3 {
            assert_eq!(timer.tick(), step);
        }
        assert_eq!(timer.ticks(), 3);
        assert_eq!(timer.elapsed(), Duration::from_millis(48));
    }

    #[test]
    fn test_wall_clock_tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.elapsed() >= delta);
    }

    #[test]
    fn test_reset_clears_ticks() {
        let mut timer = Timer::fixed_step(Duration::from_millis(10));
        timer.tick();
        timer.reset();
        assert_eq!(timer.ticks(), 0);
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }
}
