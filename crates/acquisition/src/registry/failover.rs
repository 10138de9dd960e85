//! Sequential failover across ordered candidate sources.
//!
//! Candidates are tried strictly one at a time in the given order; the first
//! success wins. Every failure kind moves on to the next candidate. Only when
//! all candidates failed does the caller see an error: one `unavailable`
//! error listing each per-source failure in attempt order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::diagnostics::FetchDiagnostics;
use super::invoker::ResilientInvoker;
use crate::clock::Clock;
use crate::errors::{MarketDataError, UpstreamFailure};

/// Value produced by the winning candidate.
#[derive(Debug)]
pub struct FailoverSuccess<T> {
    pub value: T,
    pub source_id: String,
    pub diagnostics: FetchDiagnostics,
}

pub struct FailoverCoordinator {
    invoker: Arc<ResilientInvoker>,
    clock: Arc<dyn Clock>,
}

impl FailoverCoordinator {
    pub fn new(invoker: Arc<ResilientInvoker>, clock: Arc<dyn Clock>) -> Self {
        Self { invoker, clock }
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    /// Try `operation` on each candidate in order until one succeeds.
    ///
    /// `operation` is expected to do its own resilience handling (usually
    /// through [`ResilientInvoker`]); see [`execute_invoked`](Self::execute_invoked).
    pub async fn execute<T, F, Fut>(
        &self,
        candidates: &[String],
        request_id: &str,
        mut operation: F,
    ) -> Result<FailoverSuccess<T>, MarketDataError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let mut tally = Tally::new(request_id, candidates.len());

        for source in candidates {
            let started = self.clock.now();
            let outcome = operation(source.clone()).await;
            let elapsed = self.clock.now().saturating_duration_since(started);

            match outcome {
                Ok(value) => return Ok(tally.succeeded(value, source, elapsed)),
                Err(error) => tally.failed(source, error, elapsed),
            }
        }

        Err(tally.exhausted())
    }

    /// [`execute`](Self::execute) with each candidate call wrapped in the
    /// resilient invoker.
    pub async fn execute_invoked<T, F, Fut>(
        &self,
        candidates: &[String],
        request_id: &str,
        mut operation: F,
    ) -> Result<FailoverSuccess<T>, MarketDataError>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let mut tally = Tally::new(request_id, candidates.len());

        for source in candidates {
            let started = self.clock.now();
            let outcome = self
                .invoker
                .invoke(source, request_id, || operation(source))
                .await;
            let elapsed = self.clock.now().saturating_duration_since(started);

            match outcome {
                Ok(value) => return Ok(tally.succeeded(value, source, elapsed)),
                Err(error) => tally.failed(source, error, elapsed),
            }
        }

        Err(tally.exhausted())
    }
}

/// Bookkeeping shared by both execute flavours.
struct Tally<'a> {
    request_id: &'a str,
    diagnostics: FetchDiagnostics,
    failures: Vec<MarketDataError>,
}

impl<'a> Tally<'a> {
    fn new(request_id: &'a str, candidates: usize) -> Self {
        Self {
            request_id,
            diagnostics: FetchDiagnostics::new(),
            failures: Vec::with_capacity(candidates),
        }
    }

    fn succeeded<T>(mut self, value: T, source: &str, elapsed: Duration) -> FailoverSuccess<T> {
        self.diagnostics.record_success(source, elapsed);
        debug!("Request {}: {}", self.request_id, self.diagnostics.summary());
        FailoverSuccess {
            value,
            source_id: source.to_string(),
            diagnostics: self.diagnostics,
        }
    }

    fn failed(&mut self, source: &str, error: MarketDataError, elapsed: Duration) {
        debug!("Request {}: '{}' failed: {}", self.request_id, source, error);
        self.diagnostics.record_failure(source, &error, elapsed);
        self.failures.push(error);
    }

    fn exhausted(self) -> MarketDataError {
        warn!(
            "Request {}: all {} candidate sources failed: {}",
            self.request_id,
            self.failures.len(),
            self.diagnostics.summary()
        );
        MarketDataError::unavailable(self.request_id, self.failures)
    }
}
