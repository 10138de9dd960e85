//! Per-source limits and call settings.
//!
//! Each adapter declares its own [`SourceConfig`]; engine configuration can
//! override individual fields per source.

use std::time::Duration;

use crate::registry::RateLimitConfig;

/// Limits and call settings a source declares for itself.
///
/// Controls how aggressively the engine may call a source to avoid
/// hitting its quota and getting blocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// Admitted calls in any trailing second; also the token refill rate.
    pub requests_per_second: u32,

    /// Admitted calls in any trailing minute.
    pub requests_per_minute: u32,

    /// Admitted calls in any trailing hour.
    pub requests_per_hour: u32,

    /// Token bucket capacity.
    pub burst_limit: u32,

    /// Deadline for one underlying call.
    pub timeout: Duration,

    /// Attempts per invocation, including the first.
    pub retry_attempts: u32,

    /// Lower = preferred when health is equal.
    pub priority: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            requests_per_minute: 60,
            requests_per_hour: 2000,
            burst_limit: 5,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            priority: 10,
        }
    }
}

impl SourceConfig {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: self.requests_per_second,
            requests_per_minute: self.requests_per_minute,
            requests_per_hour: self.requests_per_hour,
            burst_limit: self.burst_limit,
        }
    }
}
