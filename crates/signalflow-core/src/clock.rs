//! Simulated clock for the tick loop.
//!
//! The clock is the single source of truth for simulated time in the
//! driver loop. Time is derived from the tick counter as
//! `tick * tick_seconds` and never accumulated, so long runs do not drift
//! and two runs with the same tick length see bit-identical timestamps.

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// Invalid clock configuration (e.g. zero-length tick).
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Fixed-step simulated clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClock {
    /// Current tick number (0-indexed).
    tick: u64,

    /// Simulated seconds per tick.
    tick_seconds: f64,
}

impl SimClock {
    /// Create a clock at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `tick_seconds` is not a
    /// finite positive number.
    pub fn new(tick_seconds: f64) -> Result<Self, ClockError> {
        Self::from_parts(0, tick_seconds)
    }

    /// Create a clock at an explicit tick (useful for tests and resuming).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `tick_seconds` is not a
    /// finite positive number.
    pub fn from_parts(tick: u64, tick_seconds: f64) -> Result<Self, ClockError> {
        if !tick_seconds.is_finite() || tick_seconds <= 0.0 {
            return Err(ClockError::InvalidConfig {
                reason: format!("tick_seconds must be finite and positive, got {tick_seconds}"),
            });
        }
        Ok(Self { tick, tick_seconds })
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds per tick.
    pub const fn tick_seconds(&self) -> f64 {
        self.tick_seconds
    }

    /// Simulated time of the current tick, in seconds.
    pub fn now(&self) -> f64 {
        self.time_at(self.tick)
    }

    /// Simulated time of an arbitrary tick, in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn time_at(&self, tick: u64) -> f64 {
        // Exact for every tick below 2^53, far beyond any realistic run.
        tick as f64 * self.tick_seconds
    }
}
