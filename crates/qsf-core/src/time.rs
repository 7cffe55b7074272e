//! Time Management
//!
//! Time-step model splitting each frame into two phases:
//! - zero or more fixed-rate simulation ticks
//! - one variable-rate render pass, interpolated between the last two ticks

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delta time wrapper for type safety
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaTime(pub f64);

impl DeltaTime {
    /// Get the delta time in seconds
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Get the delta time as f32 (commonly needed for graphics)
    pub fn as_secs_f32(&self) -> f32 {
        self.0 as f32
    }
}

impl Default for DeltaTime {
    fn default() -> Self {
        Self(1.0 / 60.0)
    }
}

impl From<Duration> for DeltaTime {
    fn from(duration: Duration) -> Self {
        Self(duration.as_secs_f64())
    }
}

/// Fixed time step configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedTimeStep {
    /// Fixed timestep in seconds
    pub step: f64,
    /// Maximum number of fixed updates per frame (to prevent spiral of death)
    pub max_updates: u32,
}

impl Default for FixedTimeStep {
    fn default() -> Self {
        Self {
            step: 1.0 / 30.0,
            max_updates: 8,
        }
    }
}

impl FixedTimeStep {
    /// Create a new fixed time step with the given frequency
    pub fn from_hz(hz: f64) -> Self {
        Self {
            step: 1.0 / hz,
            ..Self::default()
        }
    }

    /// Set the maximum number of updates per frame
    pub fn with_max_updates(mut self, max: u32) -> Self {
        self.max_updates = max;
        self
    }
}

/// Time manager tracking frame time and the fixed tick accumulator
#[derive(Debug, Clone)]
pub struct TimeManager {
    /// Fixed tick configuration
    fixed: FixedTimeStep,
    /// Delta time of the last frame
    delta_time: f64,
    /// Accumulated time not yet consumed by ticks
    fixed_accumulator: f64,
    /// Fixed update count
    tick_count: u64,
    /// Time scale (for slow motion or fast forward)
    time_scale: f64,
    /// Whether the game is paused
    paused: bool,
}

impl TimeManager {
    /// Create a new time manager
    pub fn new(fixed: FixedTimeStep) -> Self {
        Self {
            fixed,
            delta_time: 0.0,
            fixed_accumulator: 0.0,
            tick_count: 0,
            time_scale: 1.0,
            paused: false,
        }
    }

    /// Advance by one frame and return how many ticks are due.
    ///
    /// The result is capped at `max_updates`; time beyond the cap is
    /// dropped so a long stall does not snowball.
    pub fn begin_frame(&mut self, delta_time: f64) -> u32 {
        // Clamp delta time to prevent extreme values
        let clamped_dt = delta_time.clamp(0.0, 0.25);
        let scaled_dt = if self.paused { 0.0 } else { clamped_dt * self.time_scale };

        self.delta_time = scaled_dt;
        self.fixed_accumulator += scaled_dt;

        let due = (self.fixed_accumulator / self.fixed.step) as u32;
        if due > self.fixed.max_updates {
            log::warn!(
                "Dropping {} ticks, frame took {:.3}s",
                due - self.fixed.max_updates,
                delta_time
            );
            self.fixed_accumulator -= f64::from(due - self.fixed.max_updates) * self.fixed.step;
            return self.fixed.max_updates;
        }
        due
    }

    /// Consume time for one tick
    pub fn consume_tick(&mut self) {
        self.fixed_accumulator = (self.fixed_accumulator - self.fixed.step).max(0.0);
        self.tick_count += 1;
    }

    /// Interpolation factor for rendering between the last two ticks
    pub fn interpolation_alpha(&self) -> f32 {
        (self.fixed_accumulator / self.fixed.step).clamp(0.0, 1.0) as f32
    }

    /// Length of one tick
    pub fn tick_duration(&self) -> DeltaTime {
        DeltaTime(self.fixed.step)
    }

    /// Get the delta time for the current frame
    pub fn delta_time(&self) -> DeltaTime {
        DeltaTime(self.delta_time)
    }

    /// Get the tick count
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Set the time scale
    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale.max(0.0);
    }

    /// Check if the game is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause the game
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume the game
    pub fn resume(&mut self) {
        self.paused = false;
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new(FixedTimeStep::default())
    }
}
