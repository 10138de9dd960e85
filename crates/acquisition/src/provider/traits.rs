//! Source adapter trait definitions.
//!
//! This module defines the `SourceAdapter` trait that every upstream
//! integration implements. Adapters own the wire format; the engine owns
//! everything else.

use async_trait::async_trait;

use crate::errors::{ParseFailure, UpstreamFailure};
use crate::models::{CanonicalRecord, OperationParams, RawPayload, RawRecord, RecordKind};

use super::capabilities::SourceConfig;

/// Trait for upstream data sources.
///
/// Implement this trait to add a new source. The engine wraps
/// `fetch_raw` in rate limiting, retries and the circuit breaker, then
/// hands the payload to `parse` and `to_canonical` inside the validation
/// pipeline.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketfeed_acquisition::provider::{SourceAdapter, SourceConfig};
///
/// struct MySource {
///     http: HttpFetcher,
/// }
///
/// #[async_trait]
/// impl SourceAdapter for MySource {
///     fn id(&self) -> &str {
///         "MY_SOURCE"
///     }
///
///     fn config(&self) -> SourceConfig {
///         SourceConfig { requests_per_minute: 30, ..SourceConfig::default() }
///     }
///
///     // ... implement fetch_raw, parse and to_canonical
/// }
/// ```
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique identifier for this source.
    ///
    /// Should be a constant string like "YAHOO", "FINNHUB", etc.
    /// Used for logging, circuit breaker tracking and health.
    fn id(&self) -> &str;

    /// Declared limits and call settings.
    fn config(&self) -> SourceConfig {
        SourceConfig::default()
    }

    /// Source priority for ordering.
    ///
    /// Lower values = higher priority. Only breaks ties between sources
    /// of equal health.
    fn priority(&self) -> u8 {
        self.config().priority
    }

    /// Perform the network call.
    async fn fetch_raw(&self, params: &OperationParams) -> Result<RawPayload, UpstreamFailure>;

    /// Decode the payload into the source's own record shape.
    fn parse(&self, payload: &RawPayload) -> Result<RawRecord, ParseFailure>;

    /// Map the source's shape onto the canonical record of `kind`,
    /// converting units and field names as needed.
    fn to_canonical(
        &self,
        raw: RawRecord,
        kind: RecordKind,
    ) -> Result<CanonicalRecord, ParseFailure>;

    /// Optional cheap liveness probe.
    ///
    /// `None` means the source has no health endpoint; health then comes
    /// from call outcomes alone.
    async fn health_check(&self) -> Option<Result<(), UpstreamFailure>> {
        None
    }
}
