//! Classification of raw upstream failures into [`MarketDataError`].
//!
//! [`classify`] is total and pure apart from the timestamp it stamps on the
//! result: the same failure with the same context always yields the same
//! kind, severity, code and retry flag.

use std::fmt;
use std::time::Duration;

use super::{ErrorDetails, ErrorKind, ErrorSeverity, MarketDataError};

/// Failure as observed at the transport or adapter boundary, before typing.
#[derive(Clone, Debug)]
pub enum UpstreamFailure {
    /// Connection refused, reset, DNS failure and similar transport errors.
    Connection { message: String },
    /// The call exceeded its deadline.
    Timeout { after: Option<Duration> },
    /// The call was aborted by an abort signal.
    Aborted,
    /// The upstream answered with a non-success HTTP status.
    Http { status: u16, message: String },
    /// The payload could not be decoded.
    MalformedPayload { message: String },
    /// Already typed (e.g. produced by a nested engine); re-stamped with the new context.
    Typed(MarketDataError),
    /// Anything else.
    Other { message: String },
}

impl UpstreamFailure {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { message } => write!(f, "connection failed: {message}"),
            Self::Timeout { after: Some(after) } => write!(f, "timed out after {after:?}"),
            Self::Timeout { after: None } => f.write_str("timed out"),
            Self::Aborted => f.write_str("aborted"),
            Self::Http { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::MalformedPayload { message } => write!(f, "malformed payload: {message}"),
            Self::Typed(error) => write!(f, "{error}"),
            Self::Other { message } => f.write_str(message),
        }
    }
}

impl From<reqwest::Error> for UpstreamFailure {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout { after: None }
        } else if let Some(status) = error.status() {
            Self::http(status.as_u16(), error.to_string())
        } else if error.is_decode() || error.is_body() {
            Self::malformed(error.to_string())
        } else if error.is_connect() || error.is_request() {
            Self::connection(error.to_string())
        } else {
            Self::other(error.to_string())
        }
    }
}

/// Adapter-level parse or mapping failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseFailure {
    pub field: Option<String>,
    pub message: String,
}

impl ParseFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Where a failure happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorContext {
    pub source_id: String,
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Map any upstream failure to a typed error. Never fails.
pub fn classify(failure: &UpstreamFailure, context: &ErrorContext) -> MarketDataError {
    let error = match failure {
        UpstreamFailure::Connection { message } => {
            MarketDataError::new(ErrorKind::Network, &context.source_id, message.clone())
                .with_code("CONNECTION_FAILED")
        }
        UpstreamFailure::Timeout { .. } => {
            MarketDataError::new(ErrorKind::Timeout, &context.source_id, failure.to_string())
                .with_code("TIMEOUT")
        }
        UpstreamFailure::Aborted => {
            MarketDataError::new(ErrorKind::Timeout, &context.source_id, "request aborted")
                .with_code("ABORTED")
        }
        UpstreamFailure::Http { status, message } => classify_status(*status, message, context),
        UpstreamFailure::MalformedPayload { message } => {
            MarketDataError::new(ErrorKind::Validation, &context.source_id, message.clone())
                .with_code("MALFORMED_PAYLOAD")
        }
        UpstreamFailure::Typed(inner) => {
            let mut error =
                MarketDataError::new(inner.kind(), &context.source_id, inner.message())
                    .with_severity(inner.severity())
                    .with_retryable(inner.is_retryable());
            if let Some(code) = inner.code() {
                error = error.with_code(code);
            }
            if let Some(details) = inner.details() {
                error = error.with_details(details.clone());
            }
            error
        }
        UpstreamFailure::Other { message } => {
            MarketDataError::new(ErrorKind::Unknown, &context.source_id, message.clone())
        }
    };

    match &context.request_id {
        Some(request_id) => error.with_request_id(request_id.clone()),
        None => error,
    }
}

fn classify_status(status: u16, message: &str, context: &ErrorContext) -> MarketDataError {
    let kind = match status {
        401 => ErrorKind::Auth,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited,
        500..=u16::MAX => ErrorKind::Server,
        _ => ErrorKind::Unknown,
    };
    let severity = match status {
        500..=u16::MAX => ErrorSeverity::High,
        429 => ErrorSeverity::Medium,
        400..=499 => ErrorSeverity::Low,
        _ => kind.default_severity(),
    };

    MarketDataError::new(kind, &context.source_id, format!("HTTP {status}: {message}"))
        .with_code(format!("HTTP_{status}"))
        .with_severity(severity)
        .with_details(ErrorDetails::HttpStatus(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ErrorContext {
        ErrorContext::new("ALPHA").with_request_id("req-42")
    }

    #[test]
    fn test_connection_failure_is_network() {
        let error = classify(&UpstreamFailure::connection("connection reset"), &ctx());
        assert_eq!(error.kind(), ErrorKind::Network);
        assert!(error.is_retryable());
        assert_eq!(error.source_id(), "ALPHA");
        assert_eq!(error.request_id(), Some("req-42"));
    }

    #[test]
    fn test_timeout_and_abort_are_timeouts() {
        let timeout = classify(
            &UpstreamFailure::Timeout {
                after: Some(Duration::from_secs(30)),
            },
            &ctx(),
        );
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.is_retryable());

        let aborted = classify(&UpstreamFailure::Aborted, &ctx());
        assert_eq!(aborted.kind(), ErrorKind::Timeout);
        assert_eq!(aborted.code(), Some("ABORTED"));
    }

    #[test]
    fn test_http_status_mapping() {
        let cases = [
            (401, ErrorKind::Auth, ErrorSeverity::Low, false),
            (403, ErrorKind::Forbidden, ErrorSeverity::Low, false),
            (404, ErrorKind::NotFound, ErrorSeverity::Low, false),
            (429, ErrorKind::RateLimited, ErrorSeverity::Medium, true),
            (500, ErrorKind::Server, ErrorSeverity::High, true),
            (503, ErrorKind::Server, ErrorSeverity::High, true),
            (400, ErrorKind::Unknown, ErrorSeverity::Low, false),
        ];

        for (status, kind, severity, retryable) in cases {
            let error = classify(&UpstreamFailure::http(status, "nope"), &ctx());
            assert_eq!(error.kind(), kind, "status {status}");
            assert_eq!(error.severity(), severity, "status {status}");
            assert_eq!(error.is_retryable(), retryable, "status {status}");
            assert_eq!(error.code(), Some(format!("HTTP_{status}").as_str()));
        }
    }

    #[test]
    fn test_malformed_payload_is_validation() {
        let error = classify(&UpstreamFailure::malformed("expected object"), &ctx());
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unknown_fallback() {
        let error = classify(&UpstreamFailure::other("something odd"), &ctx());
        assert_eq!(error.kind(), ErrorKind::Unknown);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_typed_failure_keeps_classification_and_takes_new_context() {
        let inner = MarketDataError::new(ErrorKind::Server, "INNER", "upstream 502")
            .with_code("HTTP_502")
            .with_retryable(false);
        let error = classify(&UpstreamFailure::Typed(inner), &ctx());

        assert_eq!(error.kind(), ErrorKind::Server);
        assert_eq!(error.source_id(), "ALPHA");
        assert_eq!(error.code(), Some("HTTP_502"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_classify_is_pure() {
        let failure = UpstreamFailure::http(503, "maintenance");
        let first = classify(&failure, &ctx());
        let second = classify(&failure, &ctx());
        assert!(first.same_failure(&second));
    }
}
