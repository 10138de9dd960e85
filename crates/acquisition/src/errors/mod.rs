//! Error types, classification and retry policy for the acquisition engine.
//!
//! This module provides:
//! - [`MarketDataError`]: the typed, immutable error every layer returns
//! - [`classify`]: turns raw upstream failures into a [`MarketDataError`]
//! - [`RetryStrategy`]: decides whether and when a failed call is retried

mod classifier;
mod retry;

pub use classifier::{classify, ErrorContext, ParseFailure, UpstreamFailure};
pub use retry::{ExponentialBackoff, RetryStrategy};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::Issue;

/// Closed set of failure kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Auth,
    Forbidden,
    NotFound,
    Server,
    Unavailable,
    CircuitOpen,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::Auth => "auth",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Server => "server",
            Self::Unavailable => "unavailable",
            Self::CircuitOpen => "circuit-open",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a fresh error of this kind is retryable unless overridden.
    pub const fn is_retryable_by_default(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Server | Self::Unavailable
        )
    }

    /// Severity assigned when the failure carries nothing more specific.
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Auth | Self::Forbidden | Self::NotFound => ErrorSeverity::Low,
            Self::Server | Self::Unavailable => ErrorSeverity::High,
            Self::Network
            | Self::Timeout
            | Self::RateLimited
            | Self::CircuitOpen
            | Self::Validation
            | Self::Unknown => ErrorSeverity::Medium,
        }
    }

    /// Whether the failure says something about the source itself.
    ///
    /// `NotFound` and `Validation` mean the source answered; they must not
    /// push a circuit toward opening.
    pub const fn is_source_fault(self) -> bool {
        !matches!(self, Self::NotFound | Self::Validation | Self::CircuitOpen)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload attached to an error for diagnostics.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ErrorDetails {
    /// One entry per failed candidate source, in the order they were tried.
    SourceFailures(Vec<MarketDataError>),
    /// Blocking issues found by the validation pipeline.
    ValidationIssues(Vec<Issue>),
    /// Raw HTTP status returned by the upstream.
    HttpStatus(u16),
}

/// Typed error produced at the point of failure.
///
/// Construction goes through [`MarketDataError::new`] and the `with_*`
/// builders; once built the value is only read.
#[derive(Clone, Debug, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("[{source_id}] {kind}: {message}")]
pub struct MarketDataError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    severity: ErrorSeverity,
    source_id: String,
    request_id: Option<String>,
    timestamp: DateTime<Utc>,
    retryable: bool,
    details: Option<ErrorDetails>,
}

impl MarketDataError {
    /// Create an error whose severity and retryability follow from `kind`.
    pub fn new(kind: ErrorKind, source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            severity: kind.default_severity(),
            source_id: source_id.into(),
            request_id: None,
            timestamp: Utc::now(),
            retryable: kind.is_retryable_by_default(),
            details: None,
        }
    }

    /// Fast-fail error returned while a source's circuit is open.
    pub fn circuit_open(source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let message = format!("circuit open for source '{source_id}'");
        Self::new(ErrorKind::CircuitOpen, source_id, message)
            .with_code("CIRCUIT_OPEN")
            .with_retryable(false)
    }

    /// Aggregate of every per-source failure once all candidates are exhausted.
    pub fn unavailable(request_id: impl Into<String>, failures: Vec<MarketDataError>) -> Self {
        let retryable = failures.iter().any(MarketDataError::is_retryable);
        let message = if failures.is_empty() {
            "no candidate sources to try".to_string()
        } else {
            format!("all {} candidate sources failed", failures.len())
        };
        Self::new(ErrorKind::Unavailable, "*", message)
            .with_code("ALL_SOURCES_FAILED")
            .with_request_id(request_id)
            .with_retryable(retryable)
            .with_details(ErrorDetails::SourceFailures(failures))
    }

    /// Validation failure carrying the blocking issues.
    pub fn validation(source_id: impl Into<String>, issues: Vec<Issue>) -> Self {
        let summary = issues
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(ErrorKind::Validation, source_id, summary)
            .with_code("VALIDATION_FAILED")
            .with_details(ErrorDetails::ValidationIssues(issues))
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn details(&self) -> Option<&ErrorDetails> {
        self.details.as_ref()
    }

    /// Per-source failures of an aggregated `unavailable` error.
    pub fn source_failures(&self) -> &[MarketDataError] {
        match &self.details {
            Some(ErrorDetails::SourceFailures(failures)) => failures,
            _ => &[],
        }
    }

    /// Blocking validation issues, if this is a validation failure.
    pub fn validation_issues(&self) -> &[Issue] {
        match &self.details {
            Some(ErrorDetails::ValidationIssues(issues)) => issues,
            _ => &[],
        }
    }

    /// Same failure, ignoring when it was observed.
    pub fn same_failure(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.code == other.code
            && self.severity == other.severity
            && self.source_id == other.source_id
            && self.request_id == other.request_id
            && self.retryable == other.retryable
    }
}

/// Outcome of a cancellable fetch that did not produce a record.
///
/// Cancellation is kept apart from [`MarketDataError`] because it is not a
/// failure of any source.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Failed(#[from] MarketDataError),

    #[error("request {request_id} was cancelled")]
    Cancelled { request_id: String },
}

impl AcquisitionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The underlying failure, unless the request was cancelled.
    pub fn as_failure(&self) -> Option<&MarketDataError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Cancelled { .. } => None,
        }
    }
}
