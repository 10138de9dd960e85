//! Per-source admission control.
//!
//! Two mechanisms must both pass before a call is admitted:
//!
//! - a token bucket sized to the burst limit, refilling continuously at
//!   `requests_per_second`;
//! - three sliding windows (1s, 60s, 3600s) capped at the per-second,
//!   per-minute and per-hour limits.
//!
//! A call is only recorded in the windows (and only takes a token) when it
//! is admitted. Every source has its own state behind its own lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use super::source_map::SourceMap;
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;

/// Smallest sleep between admission retries.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Rate limiter configuration for a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Cap for the 1s window; also the token refill rate.
    pub requests_per_second: u32,
    /// Cap for the 60s window.
    pub requests_per_minute: u32,
    /// Cap for the 3600s window.
    pub requests_per_hour: u32,
    /// Token bucket capacity.
    pub burst_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            requests_per_minute: 60,
            requests_per_hour: 2000,
            burst_limit: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("requestsPerSecond", self.requests_per_second),
            ("requestsPerMinute", self.requests_per_minute),
            ("requestsPerHour", self.requests_per_hour),
            ("burstLimit", self.burst_limit),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Which mechanism rejected a call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RateLimitReason {
    TokenBucket,
    PerSecond,
    PerMinute,
    PerHour,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenBucket => write!(f, "token bucket empty"),
            Self::PerSecond => write!(f, "per-second limit"),
            Self::PerMinute => write!(f, "per-minute limit"),
            Self::PerHour => write!(f, "per-hour limit"),
        }
    }
}

/// Outcome of one admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Longest wait implied by any rejecting mechanism; zero when allowed.
    pub wait: Duration,
    pub reason: Option<RateLimitReason>,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
            reason: None,
        }
    }

    pub fn wait_ms(&self) -> u64 {
        u64::try_from(self.wait.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Token bucket for a single source.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst_limit);
        Self {
            tokens: capacity,
            last_update: now,
            rate: f64::from(config.requests_per_second),
            capacity,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Calculate the wait time until a token becomes available.
    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Duration::from_secs_f64(tokens_needed / self.rate)
        }
    }
}

/// Timestamps of admitted calls within a trailing interval.
#[derive(Debug)]
struct SlidingWindow {
    span: Duration,
    limit: u32,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(span: Duration, limit: u32) -> Self {
        Self {
            span,
            limit,
            hits: VecDeque::new(),
        }
    }

    /// Drop hits that have left the window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.span {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until one more hit fits, given the window is pruned.
    fn time_until_available(&self, now: Instant) -> Duration {
        if (self.hits.len() as u64) < u64::from(self.limit) {
            return Duration::ZERO;
        }
        // The window frees a slot once the hit `len - limit` ages out
        let blocking = self.hits.len() - self.limit as usize;
        self.hits
            .get(blocking)
            .map(|&hit| (hit + self.span).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }
}

#[derive(Debug)]
struct SourceLimits {
    bucket: TokenBucket,
    windows: [(RateLimitReason, SlidingWindow); 3],
}

impl SourceLimits {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(config, now),
            windows: [
                (
                    RateLimitReason::PerSecond,
                    SlidingWindow::new(Duration::from_secs(1), config.requests_per_second),
                ),
                (
                    RateLimitReason::PerMinute,
                    SlidingWindow::new(Duration::from_secs(60), config.requests_per_minute),
                ),
                (
                    RateLimitReason::PerHour,
                    SlidingWindow::new(Duration::from_secs(3600), config.requests_per_hour),
                ),
            ],
        }
    }

    fn try_acquire(&mut self, now: Instant) -> Admission {
        self.bucket.refill(now);

        let mut rejection: Option<(RateLimitReason, Duration)> = None;
        let mut consider = |reason: RateLimitReason, wait: Duration| {
            if wait > Duration::ZERO && rejection.map_or(true, |(_, longest)| wait > longest) {
                rejection = Some((reason, wait));
            }
        };

        consider(RateLimitReason::TokenBucket, self.bucket.time_until_available());
        for (reason, window) in self.windows.iter_mut() {
            window.prune(now);
            consider(*reason, window.time_until_available(now));
        }

        match rejection {
            Some((reason, wait)) => Admission {
                allowed: false,
                wait,
                reason: Some(reason),
            },
            None => {
                self.bucket.tokens -= 1.0;
                for (_, window) in self.windows.iter_mut() {
                    window.record(now);
                }
                Admission::allowed()
            }
        }
    }
}

/// Multi-window rate limiter for all sources.
///
/// State is created on first use with the source's configured limits, or
/// the defaults when none were configured.
pub struct RateLimiter {
    limits: SourceMap<SourceLimits>,
    configs: SourceMap<RateLimitConfig>,
    default_config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: SourceMap::new("Rate limiter"),
            configs: SourceMap::new("Rate limiter config"),
            default_config: RateLimitConfig::default(),
            clock,
        }
    }

    /// Configure rate limits for a specific source. Resets its state.
    pub fn configure(&self, source: &str, config: RateLimitConfig) {
        let slot = self.configs.entry(source, || config);
        *self.configs.lock(&slot) = config;
        self.limits.remove(source);
    }

    fn config_for(&self, source: &str) -> RateLimitConfig {
        self.configs
            .get(source)
            .map(|slot| *self.configs.lock(&slot))
            .unwrap_or(self.default_config)
    }

    /// Check admission without waiting. Admitted calls are recorded.
    pub fn try_acquire(&self, source: &str) -> Admission {
        let now = self.clock.now();
        let slot = self
            .limits
            .entry(source, || SourceLimits::new(&self.config_for(source), now));
        let admission = self.limits.lock(&slot).try_acquire(now);

        if let Some(reason) = admission.reason {
            debug!(
                "Rate limiter: '{}' rejected ({}), retry in {:?}",
                source, reason, admission.wait
            );
        }
        admission
    }

    /// Suspend until `source` admits a call, then record it.
    pub async fn wait_until_available(&self, source: &str) {
        loop {
            let admission = self.try_acquire(source);
            if admission.allowed {
                return;
            }
            tokio::time::sleep(admission.wait.max(MIN_WAIT)).await;
        }
    }

    /// Get the remaining tokens for a source.
    pub fn remaining_tokens(&self, source: &str) -> f64 {
        match self.limits.get(source) {
            Some(slot) => {
                let mut limits = self.limits.lock(&slot);
                limits.bucket.refill(self.clock.now());
                limits.bucket.tokens
            }
            None => f64::from(self.config_for(source).burst_limit),
        }
    }

    /// Reset the rate limiter for a source to a full bucket and empty windows.
    pub fn reset(&self, source: &str) {
        self.limits.remove(source);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
