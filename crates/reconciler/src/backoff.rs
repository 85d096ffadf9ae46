//! Per-declaration exponential backoff for failed passes.
//!
//! The reconciler never retries on its own; the controller asks this module
//! how long to wait before requeueing an identity whose pass failed.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use cmsync_api::ObjectKey;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_secs;

/// Configuration for requeue backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    #[serde(with = "duration_secs", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    #[serde(with = "duration_secs", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Spread delays by up to 10% either way.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

const fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> bool {
    true
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffConfig {
    /// Delay before retrying after `failures` consecutive failures, without jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = seconds.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .unwrap_or(delay)
            .min(self.max_delay)
    }
}

/// Consecutive failure counts per declaration.
#[derive(Debug, Default)]
pub struct RequeueBackoff {
    config: BackoffConfig,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RequeueBackoff {
    /// Create a tracker using `config`.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Count a failure for `key` and return how long to wait before the next pass.
    pub fn record_failure(&self, key: &ObjectKey) -> Duration {
        let failures = {
            let mut counts = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        self.config.jittered(self.config.delay_for(failures))
    }

    /// Forget failures for `key` after it converged or disappeared.
    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Get the configuration.
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
