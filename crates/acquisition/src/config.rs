//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object or an empty
//! environment yields a working engine. Per-source entries only override the
//! fields they set; everything else comes from the adapter's own
//! [`SourceConfig`].

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ExponentialBackoff;
use crate::provider::SourceConfig;
use crate::registry::{CircuitBreakerConfig, HealthConfig};

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "MF_";

/// Misconfiguration. Raised at load or construction time, never per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment variable {var} has an invalid value '{value}'")]
    Env { var: String, value: String },

    #[error("Failed to initialize HTTP client: {0}")]
    HttpClient(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-source overrides. Unset fields keep the adapter's declared value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceOverrides {
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub burst_limit: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub priority: Option<u8>,
}

impl SourceOverrides {
    /// `declared` with every set field replaced.
    pub fn apply(&self, declared: SourceConfig) -> SourceConfig {
        SourceConfig {
            requests_per_second: self.requests_per_second.unwrap_or(declared.requests_per_second),
            requests_per_minute: self.requests_per_minute.unwrap_or(declared.requests_per_minute),
            requests_per_hour: self.requests_per_hour.unwrap_or(declared.requests_per_hour),
            burst_limit: self.burst_limit.unwrap_or(declared.burst_limit),
            timeout: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(declared.timeout),
            retry_attempts: self.retry_attempts.unwrap_or(declared.retry_attempts),
            priority: self.priority.unwrap_or(declared.priority),
        }
    }
}

/// Top-level engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    // Circuit breaker
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,

    // Retry
    /// Attempt budget for sources that do not declare one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,

    // Health
    pub unhealthy_after_failures: u32,
    pub degraded_latency_ms: u64,

    /// Call timeout for sources that do not declare one.
    pub default_call_timeout_ms: u64,

    /// Lifetime of cached records; zero disables caching.
    pub cache_ttl_ms: u64,

    /// Upper bound on cached records.
    pub cache_max_entries: u64,

    pub sources: HashMap<String, SourceOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            unhealthy_after_failures: 3,
            degraded_latency_ms: 5_000,
            default_call_timeout_ms: 30_000,
            cache_ttl_ms: 60_000,
            cache_max_entries: 10_000,
            sources: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `MF_*` environment variables, falling back to defaults.
    ///
    /// Recognized: `MF_FAILURE_THRESHOLD`, `MF_RECOVERY_TIMEOUT_MS`,
    /// `MF_MAX_ATTEMPTS`, `MF_BASE_DELAY_MS`, `MF_BACKOFF_MULTIPLIER`,
    /// `MF_MAX_DELAY_MS`, `MF_UNHEALTHY_AFTER_FAILURES`,
    /// `MF_DEGRADED_LATENCY_MS`, `MF_CALL_TIMEOUT_MS`, `MF_CACHE_TTL_MS`,
    /// `MF_CACHE_MAX_ENTRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        read_var(&lookup, "FAILURE_THRESHOLD", &mut config.failure_threshold)?;
        read_var(&lookup, "RECOVERY_TIMEOUT_MS", &mut config.recovery_timeout_ms)?;
        read_var(&lookup, "MAX_ATTEMPTS", &mut config.max_attempts)?;
        read_var(&lookup, "BASE_DELAY_MS", &mut config.base_delay_ms)?;
        read_var(&lookup, "BACKOFF_MULTIPLIER", &mut config.multiplier)?;
        read_var(&lookup, "MAX_DELAY_MS", &mut config.max_delay_ms)?;
        read_var(&lookup, "UNHEALTHY_AFTER_FAILURES", &mut config.unhealthy_after_failures)?;
        read_var(&lookup, "DEGRADED_LATENCY_MS", &mut config.degraded_latency_ms)?;
        read_var(&lookup, "CALL_TIMEOUT_MS", &mut config.default_call_timeout_ms)?;
        read_var(&lookup, "CACHE_TTL_MS", &mut config.cache_ttl_ms)?;
        read_var(&lookup, "CACHE_MAX_ENTRIES", &mut config.cache_max_entries)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failureThreshold", "must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("maxAttempts", "must be greater than zero"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "multiplier",
                format!("must be a finite number >= 1, got {}", self.multiplier),
            ));
        }
        if self.unhealthy_after_failures == 0 {
            return Err(ConfigError::invalid(
                "unhealthyAfterFailures",
                "must be greater than zero",
            ));
        }
        if self.default_call_timeout_ms == 0 {
            return Err(ConfigError::invalid("defaultCallTimeoutMs", "must be greater than zero"));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::invalid("cacheMaxEntries", "must be greater than zero"));
        }

        for (source, overrides) in &self.sources {
            let limits = [
                ("requestsPerSecond", overrides.requests_per_second),
                ("requestsPerMinute", overrides.requests_per_minute),
                ("requestsPerHour", overrides.requests_per_hour),
                ("burstLimit", overrides.burst_limit),
                ("retryAttempts", overrides.retry_attempts),
            ];
            for (field, value) in limits {
                if value == Some(0) {
                    return Err(ConfigError::invalid(
                        format!("sources.{}.{}", source, field),
                        "must be greater than zero",
                    ));
                }
            }
            if overrides.timeout_ms == Some(0) {
                return Err(ConfigError::invalid(
                    format!("sources.{}.timeoutMs", source),
                    "must be greater than zero",
                ));
            }
        }

        Ok(())
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
        }
    }

    /// Backoff shape with the given attempt budget.
    pub fn backoff(&self, max_attempts: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn health(&self) -> HealthConfig {
        HealthConfig {
            unhealthy_after_failures: self.unhealthy_after_failures,
            degraded_latency: Duration::from_millis(self.degraded_latency_ms),
        }
    }

    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Effective settings for `source`: the adapter's declaration plus overrides.
    pub fn source_config(&self, source: &str, declared: SourceConfig) -> SourceConfig {
        match self.sources.get(source) {
            Some(overrides) => overrides.apply(declared),
            None => declared,
        }
    }
}

fn read_var<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let var = format!("{}{}", ENV_PREFIX, name);
    if let Some(raw) = lookup(&var) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        *target = trimmed.parse().map_err(|_| ConfigError::Env {
            var,
            value: raw.clone(),
        })?;
    }
    Ok(())
}
