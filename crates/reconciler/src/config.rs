//! Controller configuration.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::{Error, Result};
use crate::reconciler::ReconcilerConfig;

/// Prefix of every environment variable read by [`ControllerConfig::from_env`].
pub const ENV_PREFIX: &str = "CMSYNC_";

/// Configuration for the controller process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Only watch declarations in this namespace; all namespaces when unset.
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// How often a converged declaration is checked again without any event.
    #[serde(with = "duration_secs", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// Maximum passes running at once (distinct declarations only).
    #[serde(default = "default_concurrency")]
    pub concurrency: u16,

    /// Write `lastSyncTime` after each successful pass.
    #[serde(default = "default_record_status")]
    pub record_status: bool,

    /// Status writes per pass before giving up on conflicts.
    #[serde(default = "default_status_max_attempts")]
    pub status_max_attempts: u32,

    /// Requeue delays after failed passes.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            resync_interval: default_resync_interval(),
            concurrency: default_concurrency(),
            record_status: default_record_status(),
            status_max_attempts: default_status_max_attempts(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from `CMSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable cannot be parsed or the
    /// result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a value cannot be parsed or the
    /// result fails [`validate`](Self::validate).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(namespace) = var("WATCH_NAMESPACE") {
            config.watch_namespace = Some(namespace);
        }
        if let Some(secs) = parse::<u64>("RESYNC_SECS", var("RESYNC_SECS"))? {
            config.resync_interval = Duration::from_secs(secs);
        }
        if let Some(concurrency) = parse("CONCURRENCY", var("CONCURRENCY"))? {
            config.concurrency = concurrency;
        }
        if let Some(enabled) = parse("RECORD_STATUS", var("RECORD_STATUS"))? {
            config.record_status = enabled;
        }
        if let Some(attempts) = parse("STATUS_MAX_ATTEMPTS", var("STATUS_MAX_ATTEMPTS"))? {
            config.status_max_attempts = attempts;
        }
        if let Some(secs) = parse::<u64>("BACKOFF_INITIAL_SECS", var("BACKOFF_INITIAL_SECS"))? {
            config.backoff.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>("BACKOFF_MAX_SECS", var("BACKOFF_MAX_SECS"))? {
            config.backoff.max_delay = Duration::from_secs(secs);
        }
        if let Some(multiplier) = parse("BACKOFF_MULTIPLIER", var("BACKOFF_MULTIPLIER"))? {
            config.backoff.multiplier = multiplier;
        }
        if let Some(jitter) = parse("BACKOFF_JITTER", var("BACKOFF_JITTER"))? {
            config.backoff.jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.status_max_attempts == 0 {
            return Err(Error::invalid_config("status_max_attempts must be at least 1"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync_interval must be positive"));
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return Err(Error::invalid_config(
                "backoff initial delay must not exceed max delay",
            ));
        }
        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(Error::invalid_config(
                "backoff multiplier must be a finite number of at least 1.0",
            ));
        }
        if self
            .watch_namespace
            .as_deref()
            .is_some_and(|namespace| namespace.trim().is_empty())
        {
            return Err(Error::invalid_config("watch_namespace must not be blank"));
        }
        Ok(())
    }

    /// Settings for the reconciler built from this configuration.
    pub const fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            record_status: self.record_status,
            status_max_attempts: self.status_max_attempts,
        }
    }
}

fn parse<T>(suffix: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .map(|raw| {
            raw.parse().map_err(|e| {
                Error::invalid_config(format!("{ENV_PREFIX}{suffix}={raw:?}: {e}"))
            })
        })
        .transpose()
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}

const fn default_concurrency() -> u16 {
    4
}

const fn default_record_status() -> bool {
    true
}

const fn default_status_max_attempts() -> u32 {
    3
}

/// Serialization helper for Duration as seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
