//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use fieldsync_core::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry and backoff behavior.
    pub retry: RetryConfig,
    /// Upper bound on a single transport call.
    pub transport_timeout: Duration,
    /// What happens to a freshly detected conflict.
    pub conflict_policy: ConflictPolicy,
    /// Arm a timer for the next backoff gate after each cycle.
    pub schedule_retries: bool,
    /// Interval for periodic sync, if any.
    pub sync_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            transport_timeout: Duration::from_secs(30),
            conflict_policy: ConflictPolicy::Manual,
            schedule_retries: true,
            sync_interval: None,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the maximum number of transport attempts per action.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Sets the transport timeout.
    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Enables or disables the retry timer.
    pub fn with_schedule_retries(mut self, enabled: bool) -> Self {
        self.schedule_retries = enabled;
        self
    }

    /// Sets the sync interval for periodic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for unusable values.
    pub fn validate(&self) -> SyncResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "maxAttempts must be at least 1".into(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(SyncError::InvalidConfig(
                "backoffCapMs must not be below baseBackoffMs".into(),
            ));
        }
        if self.transport_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "transportTimeoutMs must be positive".into(),
            ));
        }
        if self.sync_interval.is_some_and(|i| i.is_zero()) {
            return Err(SyncError::InvalidConfig(
                "sync interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of transport attempts, first send included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that dead-letters on the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Delay before the next send of an action that has failed `attempts`
    /// times. Zero attempts means no delay; the result never exceeds
    /// `max_delay`, jitter included.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        let mut delay_secs = base_delay.min(cap);

        if self.add_jitter {
            // Up to 25% on top, still capped.
            delay_secs = (delay_secs * (1.0 + 0.25 * rand::random::<f64>())).min(cap);
        }

        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Caller-facing options, as read from a JSON file or the host app.
///
/// Every field is optional; missing ones keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncOptions {
    /// Maximum transport attempts per action.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub base_backoff_ms: Option<u64>,
    /// Ceiling on any backoff, in milliseconds.
    pub backoff_cap_ms: Option<u64>,
    /// Timeout for one transport call, in milliseconds.
    pub transport_timeout_ms: Option<u64>,
    /// Conflict policy.
    pub conflict_policy: Option<ConflictPolicy>,
}

impl SyncOptions {
    /// Parses options from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Options`] on malformed JSON or unknown keys.
    pub fn from_json_str(text: &str) -> SyncResult<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::Options(e.to_string()))
    }

    /// Reads options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Options`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Options(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Applies these options over `base` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the merged configuration is
    /// unusable, for example `maxAttempts` of zero.
    pub fn apply_to(&self, mut base: SyncConfig) -> SyncResult<SyncConfig> {
        if let Some(max_attempts) = self.max_attempts {
            base.retry.max_attempts = max_attempts;
        }
        if let Some(ms) = self.base_backoff_ms {
            base.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.backoff_cap_ms {
            base.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.transport_timeout_ms {
            base.transport_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = self.conflict_policy {
            base.conflict_policy = policy;
        }
        base.validate()?;
        Ok(base)
    }

    /// Builds a validated configuration from these options and defaults.
    ///
    /// # Errors
    ///
    /// See [`SyncOptions::apply_to`].
    pub fn into_config(self) -> SyncResult<SyncConfig> {
        self.apply_to(SyncConfig::default())
    }
}
