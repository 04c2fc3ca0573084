//! Backoff policies.
//!
//! Two independent strategies the supervisor composes:
//! - [`ExponentialBackoff`]: bounded doubling steps, exhausted after a
//!   fixed number of attempts (used while every endpoint is unhealthy)
//! - [`JitteredDelay`]: a base delay stretched by up to 50% of random jitter
//!   (used after any other failure)

use std::time::Duration;

use rand::Rng;

/// Doubling delay with a hard cap on the number of steps.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    seed: Duration,
    factor: u32,
    max_steps: u32,
    step: u32,
}

impl ExponentialBackoff {
    pub fn new(seed: Duration, factor: u32, max_steps: u32) -> Self {
        Self {
            seed,
            factor,
            max_steps,
            step: 0,
        }
    }

    /// Delay for the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.step >= self.max_steps {
            return None;
        }
        let multiplier = self.factor.saturating_pow(self.step);
        self.step += 1;
        Some(self.seed.saturating_mul(multiplier))
    }

    /// Steps taken so far.
    pub fn attempts(&self) -> u32 {
        self.step
    }
}

impl Default for ExponentialBackoff {
    /// 1s, 2s, 4s, 8s, 16s, 32s.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2, 6)
    }
}

/// `base * (1 + random() * 0.5)`.
#[derive(Debug, Clone, Copy)]
pub struct JitteredDelay {
    base: Duration,
}

impl JitteredDelay {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn next_delay(&self) -> Duration {
        self.with_sample(rand::thread_rng().gen::<f64>())
    }

    /// Delay for a given random sample in `[0, 1)`.
    pub fn with_sample(&self, sample: f64) -> Duration {
        self.base.mul_f64(1.0 + sample.clamp(0.0, 1.0) * 0.5)
    }
}
