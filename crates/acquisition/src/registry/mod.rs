//! Per-source resilience.
//!
//! This module provides the protection layered around every source call:
//! - Rate limiting per source (token bucket + sliding windows)
//! - Circuit breaking for fault tolerance
//! - Rolling health tracking and candidate ranking
//! - Retry/timeout composition (`ResilientInvoker`)
//! - Sequential failover across candidates (`FailoverCoordinator`)
//!
//! State is held per source behind its own lock; no lock spans sources.

mod circuit_breaker;
mod diagnostics;
mod failover;
mod health;
mod invoker;
mod rate_limiter;
mod source_map;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState,
};
pub use diagnostics::{AttemptOutcome, FetchDiagnostics, SourceAttempt};
pub use failover::{FailoverCoordinator, FailoverSuccess};
pub use health::{HealthConfig, HealthStatus, HealthTracker, SourceHealth};
pub use invoker::{ResilientInvoker, SourcePolicy};
pub use rate_limiter::{Admission, RateLimitConfig, RateLimitReason, RateLimiter};
