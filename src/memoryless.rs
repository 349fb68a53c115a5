//! Bounded memoryless (Poisson-like) sampling intervals.
//!
//! Intervals are drawn from a truncated exponential distribution so the
//! telemetry samples never synchronize with the network RTT or with
//! client-side timers; a fixed period would alias against both.

use std::time::Duration;

use rand::Rng;

#[derive(thiserror::Error, Debug)]
pub enum TickerError {
    #[error("Invalid sampling intervals: 0 < min <= expected <= max is required")]
    InvalidIntervals,
}

/// Inter-sample interval bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub min: Duration,
    pub expected: Duration,
    pub max: Duration,
}

impl Config {
    pub fn validate(&self) -> Result<(), TickerError> {
        if self.min.is_zero() || self.min > self.expected || self.expected > self.max {
            return Err(TickerError::InvalidIntervals);
        }
        Ok(())
    }
}

/// Draws exponentially distributed intervals clamped to `[min, max]`.
pub struct Ticker {
    config: Config,
}

impl Ticker {
    pub fn new(config: Config) -> Result<Self, TickerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn next_interval(&self) -> Duration {
        // Inverse CDF of the exponential distribution over a uniform draw.
        let u: f64 = rand::rng().random();
        let raw = -self.config.expected.as_secs_f64() * (1.0 - u).ln();
        Duration::from_secs_f64(raw.clamp(
            self.config.min.as_secs_f64(),
            self.config.max.as_secs_f64(),
        ))
    }
}
