//! Marketfeed Acquisition Crate
//!
//! This crate acquires market data from many independent, unreliable
//! upstream sources and presents callers with one dependable interface.
//!
//! # Overview
//!
//! The acquisition crate supports:
//! - Multiple record kinds: quotes, order book snapshots, balance sheets
//! - Multiple sources behind one [`SourceAdapter`] trait
//! - Per-source circuit breaking, multi-window rate limiting, retry with
//!   exponential backoff and per-call timeouts
//! - Health-ranked sequential failover
//! - Staged normalization and validation of every payload
//!
//! # Architecture
//!
//! ```text
//!                          +------------------+
//!                          | AcquisitionEngine|  (cache, ranking, metadata)
//!                          +------------------+
//!                                  |
//!                                  v
//!                         +-------------------+
//!                         |FailoverCoordinator|  (one candidate at a time)
//!                         +-------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          | ResilientInvoker |  (circuit, rate limit, retry, timeout)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  SourceAdapter   |  (fetch_raw, parse, to_canonical)
//!                          +------------------+
//!                                  |
//!                                  v
//!                         +--------------------+
//!                         | ValidationPipeline |  (schema, business rules, quality)
//!                         +--------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  FetchedRecord   |  (canonical record + metadata)
//!                          +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`AcquisitionEngine`] - Entry point; built with [`AcquisitionEngine::builder`]
//! - [`AcquisitionRequest`] - Cache key, operation parameters and candidate sources
//! - [`CanonicalRecord`] - Normalized record, independent of its source
//! - [`MarketDataError`] - Typed, immutable error with kind, severity and retry flag
//! - [`EngineConfig`] - Engine settings and per-source overrides
//!
//! # Type Aliases
//!
//! - [`SourceId`] - Source identifier (e.g., "YAHOO", "FINNHUB")
//! - [`RequestKey`] - Cache key of a logical request

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod validation;

// Re-export the façade
pub use engine::{AcquisitionEngine, AcquisitionEngineBuilder, AcquisitionRequest};

// Re-export collaborators
pub use cache::{InMemoryRecordCache, RecordCache, DEFAULT_MAX_ENTRIES};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig, SourceOverrides};

// Re-export error types
pub use errors::{
    classify, AcquisitionError, ErrorContext, ErrorDetails, ErrorKind, ErrorSeverity,
    ExponentialBackoff, MarketDataError, ParseFailure, RetryStrategy, UpstreamFailure,
};

// Re-export all public types from models
pub use models::{
    BalanceSheet, BookLevel, CanonicalRecord, FetchedRecord, OperationParams, OrderBookSnapshot,
    Quote, RawPayload, RawRecord, RecordKind, RequestKey, ResponseMeta, SourceId,
};

// Re-export provider types
pub use provider::{HttpFetcher, SourceAdapter, SourceConfig};

// Re-export registry types
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, FailoverCoordinator,
    FetchDiagnostics, HealthStatus, HealthTracker, RateLimitConfig, RateLimiter, ResilientInvoker,
    SourceHealth, SourcePolicy,
};

// Re-export validation types
pub use validation::{
    Issue, IssueKind, IssueSeverity, RuleSet, Stage, ValidationContext, ValidationOutcome,
    ValidationPipeline,
};
