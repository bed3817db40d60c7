//! Exponential backoff with jitter.
//!
//! The undithered sequence is `d0 = initial`, `dn = min(dn-1 * multiplier, max)`.
//! Jitter multiplies each delay by a uniform factor in `[1 - j, 1 + j]` and
//! clamps the result to `max`, so delays stay non-decreasing up to the cap
//! within the jitter tolerance.

use std::time::Duration;

use rand::Rng;

use crate::config::BackendServiceConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Symmetric jitter fraction in `[0, 1)`; zero disables jitter.
    pub jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackendServiceConfig) -> Self {
        Self {
            initial: config.retry_delay(),
            max: config.max_retry_delay(),
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `retry` (0 for the first retry), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let initial = self.initial.min(self.max);
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let scaled = initial.as_nanos() as f64 * factor;
        if !scaled.is_finite() || scaled >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }

    /// Delay before retry number `retry`, with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter.min(0.99);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor).min(self.max)
    }
}
