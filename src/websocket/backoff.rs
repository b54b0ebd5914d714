//! Reconnect delays
//!
//! Exponential growth up to a cap with a bounded jitter. Delays grow strictly
//! with the attempt number until the cap is reached:
//! - the jitter ratio never exceeds `(factor - 1) / (factor + 1)`, so the
//!   ranges of two uncapped neighbours never overlap
//! - an uncapped delay always stays below the smallest capped delay

use rand::Rng;
use std::time::Duration;

use crate::config::config::WebSocketConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    factor: f64,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            factor: factor.max(1.0),
            jitter: jitter.clamp(0.0, Self::max_jitter(factor)),
        }
    }

    /// Largest jitter ratio that keeps uncapped delays strictly increasing
    pub fn max_jitter(factor: f64) -> f64 {
        let factor = factor.max(1.0);
        (factor - 1.0) / (factor + 1.0)
    }

    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_max_ms),
            config.reconnect_factor,
            config.reconnect_jitter,
        )
    }

    /// `min(cap, base * factor^attempt)` without jitter
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(64) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        let capped = scaled.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal(attempt).as_secs_f64();
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(nominal);
        }

        let cap = self.cap.as_secs_f64();
        let low = nominal * (1.0 - self.jitter);
        let secs = if nominal < cap {
            // Exclusive upper bound: the next range starts exactly where this one ends
            let high = (nominal * (1.0 + self.jitter)).min(cap * (1.0 - self.jitter));
            rng.gen_range(low..high)
        } else {
            rng.gen_range(low..=nominal * (1.0 + self.jitter))
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}
