//! Acquisition façade.
//!
//! [`AcquisitionEngine::fetch`] runs one logical request end to end:
//!
//! 1. Cache lookup by request key; a hit returns immediately
//! 2. Rank the candidates by health, then priority
//! 3. Fail over across the ranked candidates; each attempt is one resilient
//!    invocation of the adapter's `fetch_raw` followed by normalization and
//!    validation of the payload
//! 4. Cache the validated record and return it with response metadata
//!
//! All per-source state (circuits, rate limits, health) lives in services
//! created by the builder and owned by the engine; nothing is global.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::cache::{InMemoryRecordCache, RecordCache};
use crate::cancel::CancelSignal;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::errors::{
    classify, AcquisitionError, ErrorContext, ErrorDetails, ErrorKind, MarketDataError,
    RetryStrategy, UpstreamFailure,
};
use crate::models::{FetchedRecord, OperationParams, RequestKey, ResponseMeta, SourceId};
use crate::provider::SourceAdapter;
use crate::registry::{
    CircuitBreaker, CircuitSnapshot, FailoverCoordinator, FailoverSuccess, HealthTracker,
    RateLimiter, ResilientInvoker, SourceHealth, SourcePolicy,
};
use crate::validation::{Validated, ValidationPipeline};

/// One logical fetch.
#[derive(Clone, Debug)]
pub struct AcquisitionRequest {
    /// Cache key; two requests with the same key share cached records.
    pub key: RequestKey,
    pub params: OperationParams,
    /// Sources to try. Empty means every registered source.
    pub candidates: Vec<SourceId>,
}

impl AcquisitionRequest {
    /// Request keyed by kind, symbol and extra parameters.
    pub fn new(params: OperationParams) -> Self {
        let mut key = format!(
            "{}:{}",
            params.kind.as_str().to_ascii_lowercase(),
            params.symbol
        );
        for (name, value) in &params.extra {
            key.push_str(&format!(";{}={}", name, value));
        }
        Self {
            key,
            params,
            candidates: Vec::new(),
        }
    }

    pub fn quote(symbol: impl Into<String>) -> Self {
        Self::new(OperationParams::quote(symbol))
    }

    pub fn with_key(mut self, key: impl Into<RequestKey>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceId>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }
}

/// Builder for [`AcquisitionEngine`].
pub struct AcquisitionEngineBuilder {
    config: EngineConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    cache: Option<Arc<dyn RecordCache>>,
    pipeline: Option<ValidationPipeline>,
    clock: Option<Arc<dyn Clock>>,
    retry_strategies: HashMap<String, Arc<dyn RetryStrategy>>,
}

impl AcquisitionEngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            adapters: Vec::new(),
            cache: None,
            pipeline: None,
            clock: None,
            retry_strategies: HashMap::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a source. Registration order is the default candidate order.
    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Defaults to an [`InMemoryRecordCache`] bounded by `cacheMaxEntries`.
    pub fn cache(mut self, cache: Arc<dyn RecordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Defaults to [`ValidationPipeline::with_default_rules`].
    pub fn pipeline(mut self, pipeline: ValidationPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the configured backoff for one source.
    pub fn retry_strategy(mut self, source: impl Into<String>, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategies.insert(source.into(), strategy);
        self
    }

    pub fn build(self) -> Result<AcquisitionEngine, ConfigError> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let breaker = Arc::new(CircuitBreaker::with_config(
            config.circuit_breaker(),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone()));
        let health = Arc::new(HealthTracker::new(config.health()));
        let invoker = ResilientInvoker::new(breaker, limiter.clone(), health.clone(), clock.clone())
            .with_default_policy(SourcePolicy::new(
                Arc::new(config.backoff(config.max_attempts)),
                config.default_call_timeout(),
            ));

        let mut adapters = HashMap::with_capacity(self.adapters.len());
        let mut order = Vec::with_capacity(self.adapters.len());
        for adapter in self.adapters {
            let id = adapter.id().to_string();
            if adapters.contains_key(&id) {
                return Err(ConfigError::Invalid {
                    field: "adapters".to_string(),
                    message: format!("source '{}' registered twice", id),
                });
            }

            let mut declared = adapter.config();
            declared.priority = adapter.priority();
            let effective = config.source_config(&id, declared);
            effective.rate_limit().validate()?;
            if effective.retry_attempts == 0 || effective.timeout.is_zero() {
                return Err(ConfigError::Invalid {
                    field: format!("sources.{}", id),
                    message: "retry attempts and timeout must be greater than zero".to_string(),
                });
            }

            limiter.configure(&id, effective.rate_limit());
            health.set_priority(&id, effective.priority);
            let retry: Arc<dyn RetryStrategy> = match self.retry_strategies.get(&id) {
                Some(strategy) => strategy.clone(),
                None => Arc::new(config.backoff(effective.retry_attempts)),
            };
            invoker.set_policy(&id, SourcePolicy::new(retry, effective.timeout));

            debug!("Registered source '{}': {:?}", id, effective);
            adapters.insert(id.clone(), adapter);
            order.push(id);
        }

        let invoker = Arc::new(invoker);
        let cache: Arc<dyn RecordCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(InMemoryRecordCache::with_max_capacity(config.cache_max_entries)),
        };

        info!(
            "Acquisition engine ready with {} source(s): {}",
            order.len(),
            order.join(", ")
        );

        Ok(AcquisitionEngine {
            adapters,
            order,
            failover: FailoverCoordinator::new(invoker.clone(), clock.clone()),
            invoker,
            pipeline: self.pipeline.unwrap_or_else(ValidationPipeline::with_default_rules),
            cache,
            cache_ttl: config.cache_ttl(),
            clock,
        })
    }
}

/// Multi-source acquisition engine.
pub struct AcquisitionEngine {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    order: Vec<SourceId>,
    failover: FailoverCoordinator,
    invoker: Arc<ResilientInvoker>,
    pipeline: ValidationPipeline,
    cache: Arc<dyn RecordCache>,
    cache_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl AcquisitionEngine {
    pub fn builder() -> AcquisitionEngineBuilder {
        AcquisitionEngineBuilder::new()
    }

    /// Registered source ids, in registration order.
    pub fn sources(&self) -> &[SourceId] {
        &self.order
    }

    /// Fetch a validated record for `request`.
    ///
    /// Fails with one terminal error: `validation` when every candidate
    /// answered with invalid data, `unavailable` otherwise.
    pub async fn fetch(&self, request: &AcquisitionRequest) -> Result<FetchedRecord, MarketDataError> {
        let request_id = Uuid::new_v4().to_string();
        self.run(request, &request_id).await
    }

    /// Fetch with the default key for `params` over the given candidates.
    pub async fn fetch_with(
        &self,
        params: OperationParams,
        candidates: &[&str],
    ) -> Result<FetchedRecord, MarketDataError> {
        let request = AcquisitionRequest::new(params).with_candidates(candidates.iter().copied());
        self.fetch(&request).await
    }

    /// [`fetch`](Self::fetch) that stops as soon as `cancel` fires.
    ///
    /// The in-flight call is dropped and remaining retries and candidates
    /// are skipped. Nothing about the cancelled attempt is reported to the
    /// circuit breaker or the health tracker.
    pub async fn fetch_cancellable(
        &self,
        request: &AcquisitionRequest,
        cancel: &CancelSignal,
    ) -> Result<FetchedRecord, AcquisitionError> {
        let request_id = Uuid::new_v4().to_string();
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled { request_id });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Request {} for '{}' cancelled by caller", request_id, request.key);
                Err(AcquisitionError::Cancelled { request_id: request_id.clone() })
            }
            result = self.run(request, &request_id) => result.map_err(AcquisitionError::Failed),
        }
    }

    async fn run(&self, request: &AcquisitionRequest, request_id: &str) -> Result<FetchedRecord, MarketDataError> {
        let started = self.clock.now();

        if let Some(mut hit) = self.cache.get(&request.key).await {
            debug!("Request {}: cache hit for '{}'", request_id, request.key);
            hit.meta.from_cache = true;
            hit.meta.request_id = request_id.to_string();
            hit.meta.elapsed_ms = self.elapsed_ms(started);
            return Ok(hit);
        }

        let candidates: &[SourceId] = if request.candidates.is_empty() {
            &self.order
        } else {
            &request.candidates
        };
        let ranked = self.invoker.health().ranked_sources(candidates);
        debug!("Request {}: candidates ranked {:?}", request_id, ranked);

        let params = &request.params;
        let outcome = self
            .failover
            .execute(&ranked, request_id, move |source| async move {
                self.attempt(&source, request_id, params).await
            })
            .await;

        match outcome {
            Ok(FailoverSuccess {
                value,
                source_id,
                diagnostics,
            }) => {
                info!(
                    "Request {}: '{}' served by '{}' ({})",
                    request_id,
                    request.key,
                    source_id,
                    diagnostics.summary()
                );
                let Validated { record, outcome } = value;
                let fetched = FetchedRecord {
                    record,
                    warnings: outcome.warnings,
                    meta: ResponseMeta {
                        source_id,
                        timestamp: Utc::now(),
                        request_id: request_id.to_string(),
                        elapsed_ms: self.elapsed_ms(started),
                        from_cache: false,
                    },
                };
                self.cache
                    .set(&request.key, fetched.clone(), self.cache_ttl)
                    .await;
                Ok(fetched)
            }
            Err(error) => Err(terminal_error(error, request_id)),
        }
    }

    /// One candidate: resilient fetch, then normalize and validate.
    async fn attempt(
        &self,
        source: &str,
        request_id: &str,
        params: &OperationParams,
    ) -> Result<Validated, MarketDataError> {
        let Some(adapter) = self.adapters.get(source) else {
            return Err(MarketDataError::new(
                ErrorKind::Unknown,
                source,
                format!("no adapter registered for source '{}'", source),
            )
            .with_code("ADAPTER_NOT_REGISTERED")
            .with_retryable(false)
            .with_request_id(request_id));
        };

        let adapter = adapter.as_ref();
        let pipeline = &self.pipeline;
        self.invoker
            .invoke(source, request_id, move || async move {
                adapter.fetch_raw(params).await.and_then(|payload| {
                    pipeline
                        .normalize_and_validate(adapter, &payload, params.kind)
                        .map_err(UpstreamFailure::Typed)
                })
            })
            .await
    }

    fn elapsed_ms(&self, started: std::time::Instant) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(started);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Health of every registered source.
    pub fn source_health(&self) -> BTreeMap<SourceId, SourceHealth> {
        let health = self.invoker.health();
        self.order
            .iter()
            .map(|source| (source.clone(), health.health(source)))
            .collect()
    }

    /// Circuit state of every registered source.
    pub fn circuit_states(&self) -> BTreeMap<SourceId, CircuitSnapshot> {
        let breaker = self.invoker.circuit_breaker();
        self.order
            .iter()
            .map(|source| (source.clone(), breaker.snapshot(source)))
            .collect()
    }

    /// Tokens left in a source's bucket.
    pub fn remaining_tokens(&self, source: &str) -> f64 {
        self.invoker.rate_limiter().remaining_tokens(source)
    }

    pub fn reset_circuit(&self, source: &str) {
        info!("Resetting circuit for '{}'", source);
        self.invoker.circuit_breaker().reset(source);
    }

    pub fn reset_rate_limit(&self, source: &str) {
        info!("Resetting rate limit state for '{}'", source);
        self.invoker.rate_limiter().reset(source);
    }

    pub fn reset_health(&self, source: &str) {
        info!("Resetting health for '{}'", source);
        self.invoker.health().reset(source);
    }

    /// Run every adapter's health check once and fold the results into
    /// health state. Sources without a health check are skipped.
    ///
    /// Returns the health of each probed source.
    pub async fn probe_sources(&self) -> BTreeMap<SourceId, SourceHealth> {
        let health = self.invoker.health();
        let mut probed = BTreeMap::new();

        for source in &self.order {
            let Some(adapter) = self.adapters.get(source) else {
                continue;
            };
            let timeout = self.invoker.policy(source).call_timeout;
            let started = self.clock.now();
            let outcome = match tokio::time::timeout(timeout, adapter.health_check()).await {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(_) => Err(UpstreamFailure::Timeout {
                    after: Some(timeout),
                }),
            };
            let elapsed = self.clock.now().saturating_duration_since(started);

            match outcome {
                Ok(()) => health.report_outcome(source, true, Some(elapsed)),
                Err(failure) => {
                    let error = classify(&failure, &ErrorContext::new(source.as_str()));
                    warn!("Health check for '{}' failed: {}", source, error);
                    health.report_outcome(source, false, None);
                }
            }
            probed.insert(source.clone(), health.health(source));
        }

        probed
    }

    /// Probe sources every `every` until `shutdown` turns true or its
    /// sender is dropped.
    pub fn spawn_health_poller(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Health poller started ({:?} interval)", every);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        let probed = engine.probe_sources().await;
                        debug!("Health poller probed {} source(s)", probed.len());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Health poller stopped");
        })
    }
}

/// Collapse an exhausted failover into the error callers see.
fn terminal_error(error: MarketDataError, request_id: &str) -> MarketDataError {
    let failures = error.source_failures();
    let all_invalid = !failures.is_empty()
        && failures
            .iter()
            .all(|failure| failure.kind() == ErrorKind::Validation);
    if !all_invalid {
        return error;
    }

    MarketDataError::new(
        ErrorKind::Validation,
        "*",
        format!(
            "all {} candidate sources returned invalid data",
            failures.len()
        ),
    )
    .with_code("VALIDATION_FAILED")
    .with_request_id(request_id)
    .with_retryable(false)
    .with_details(ErrorDetails::SourceFailures(failures.to_vec()))
}
