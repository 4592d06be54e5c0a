//! Retry policy: decides the delay before a failed task runs again.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Scheduler-wide retry timing.
///
/// Each task carries its own `retry_delay` (the base delay). The policy
/// decides how that base grows with the retry number:
/// - `multiplier = 1.0` (default): fixed delay
/// - `multiplier > 1.0`: exponential backoff, capped by `max_delay_ms`
/// - `jitter_ms`: uniform random extra delay in `0..=jitter_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub multiplier: f64,
    pub max_delay_ms: Option<u64>,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed()
    }
}

impl RetryPolicy {
    pub fn fixed() -> Self {
        Self {
            multiplier: 1.0,
            max_delay_ms: None,
            jitter_ms: 0,
        }
    }

    pub fn exponential(multiplier: f64) -> Self {
        Self {
            multiplier,
            ..Self::fixed()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Delay before retry number `retry` (1-indexed) of a task whose base
    /// delay is `base`.
    ///
    /// Example with base=2s, multiplier=2.0:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn next_delay(&self, base: Duration, retry: u32) -> Duration {
        let delay = if base.is_zero() {
            Duration::ZERO
        } else {
            let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
            let mut secs = base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
            if let Some(max_ms) = self.max_delay_ms {
                secs = secs.min(max_ms as f64 / 1000.0);
            }
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        };

        if self.jitter_ms == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter_ms);
        delay.saturating_add(Duration::from_millis(extra))
    }
}
