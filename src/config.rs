//! Configuration types for meeting-sync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for [`SyncEngine`](crate::SyncEngine)
///
/// Every field has a default, so `Config::default()` works out of the box and a
/// partial JSON document deserializes into a complete config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Backoff policy for opening progress channels
    #[serde(default)]
    pub retry: RetryConfig,

    /// Subscription lifecycle settings
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Capacity of the observer event channel (default: 1000)
    ///
    /// Observers that fall further behind than this lag and miss events;
    /// they never slow the engine down.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            subscription: SubscriptionConfig::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::Config {
                message: "event_buffer must be greater than zero".to_string(),
                key: Some("event_buffer".to_string()),
            });
        }
        if self.subscription.provision_concurrency == 0 {
            return Err(Error::Config {
                message: "provision_concurrency must be greater than zero".to_string(),
                key: Some("subscription.provision_concurrency".to_string()),
            });
        }
        if self.subscription.idle_timeout == Some(Duration::ZERO) {
            return Err(Error::Config {
                message: "idle_timeout must be greater than zero (omit it to disable)".to_string(),
                key: Some("subscription.idle_timeout".to_string()),
            });
        }
        if self.retry.backoff_multiplier <= 0.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(Error::Config {
                message: format!(
                    "backoff_multiplier must be a positive number, got {}",
                    self.retry.backoff_multiplier
                ),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

/// Retry configuration for opening progress channels
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Progress subscription settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Consecutive channel drops tolerated before a task is marked stalled (default: 5)
    ///
    /// The counter resets whenever the channel delivers an event.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,

    /// Treat a channel that is silent for this long as dropped (default: disabled)
    ///
    /// Leaving this unset means a quiet transfer waits indefinitely; the
    /// stalled-vs-failed decision stays with the operator.
    #[serde(default, with = "optional_duration_serde")]
    pub idle_timeout: Option<Duration>,

    /// Maximum provisioning calls in flight at once (default: 8)
    #[serde(default = "default_provision_concurrency")]
    pub provision_concurrency: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_reconnects: default_max_reconnects(),
            idle_timeout: None,
            provision_concurrency: default_provision_concurrency(),
        }
    }
}

fn default_event_buffer() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_provision_concurrency() -> usize {
    8
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
