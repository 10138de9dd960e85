//! One call to one source, wrapped in every per-source protection.
//!
//! Order of operations for [`ResilientInvoker::invoke`]:
//!
//! 1. Take a circuit permit; an open circuit fails fast with `circuit-open`
//!    and nothing else happens.
//! 2. Per attempt: wait for rate-limit admission, run the operation under
//!    the source's call timeout, classify any failure.
//! 3. Ask the retry strategy; sleep the backoff and loop, or stop.
//! 4. Report the final outcome once to the circuit breaker and the health
//!    tracker.
//!
//! Dropping the returned future (caller cancellation) reports nothing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::circuit_breaker::CircuitBreaker;
use super::health::HealthTracker;
use super::rate_limiter::RateLimiter;
use super::source_map::SourceMap;
use crate::clock::Clock;
use crate::errors::{classify, ErrorContext, ExponentialBackoff, MarketDataError, RetryStrategy, UpstreamFailure};

/// Retry strategy and call timeout for one source.
#[derive(Clone)]
pub struct SourcePolicy {
    pub retry: Arc<dyn RetryStrategy>,
    pub call_timeout: Duration,
}

impl SourcePolicy {
    pub fn new(retry: Arc<dyn RetryStrategy>, call_timeout: Duration) -> Self {
        Self {
            retry,
            call_timeout,
        }
    }
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            retry: Arc::new(ExponentialBackoff::default()),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for SourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourcePolicy")
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// Composes circuit breaker, rate limiter, retry and timeout around a call.
pub struct ResilientInvoker {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthTracker>,
    policies: SourceMap<SourcePolicy>,
    default_policy: SourcePolicy,
    clock: Arc<dyn Clock>,
}

impl ResilientInvoker {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        health: Arc<HealthTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            breaker,
            limiter,
            health,
            policies: SourceMap::new("Invoker policy"),
            default_policy: SourcePolicy::default(),
            clock,
        }
    }

    /// Policy used for sources without their own.
    pub fn with_default_policy(mut self, policy: SourcePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn set_policy(&self, source: &str, policy: SourcePolicy) {
        let slot = self.policies.entry(source, || policy.clone());
        *self.policies.lock(&slot) = policy;
    }

    pub fn policy(&self, source: &str) -> SourcePolicy {
        self.policies
            .get(source)
            .map(|slot| self.policies.lock(&slot).clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Run `operation` against `source` with retries.
    ///
    /// `operation` is called once per attempt. Fails with the last classified
    /// error once retries are exhausted or the error is not retryable, or with
    /// `circuit-open` without calling it at all.
    pub async fn invoke<T, F, Fut>(
        &self,
        source: &str,
        request_id: &str,
        mut operation: F,
    ) -> Result<T, MarketDataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let permit = self
            .breaker
            .try_acquire(source)
            .map_err(|error| error.with_request_id(request_id))?;

        let policy = self.policy(source);
        let context = ErrorContext::new(source).with_request_id(request_id);
        let mut attempt: u32 = 1;

        loop {
            self.limiter.wait_until_available(source).await;

            let started = self.clock.now();
            let outcome = match tokio::time::timeout(policy.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamFailure::Timeout {
                    after: Some(policy.call_timeout),
                }),
            };
            let elapsed = self.clock.now().saturating_duration_since(started);

            let failure = match outcome {
                Ok(value) => {
                    debug!(
                        "'{}' succeeded on attempt {} in {:?}",
                        source, attempt, elapsed
                    );
                    permit.record_success();
                    self.health.report_outcome(source, true, Some(elapsed));
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let error = classify(&failure, &context);
            if policy.retry.should_retry(&error, attempt) {
                let delay = policy.retry.delay(attempt);
                debug!(
                    "'{}' attempt {}/{} failed ({}), retrying in {:?}",
                    source,
                    attempt,
                    policy.retry.max_attempts(),
                    error.kind(),
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            debug!(
                "'{}' gave up after {} attempt(s): {}",
                source, attempt, error
            );
            // The breaker skips kinds that show the source answered; health does not
            permit.record_failure(error.kind());
            self.health.report_outcome(source, false, None);
            return Err(error);
        }
    }
}
