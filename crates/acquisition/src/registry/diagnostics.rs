//! Attempt log of a failover run.

use std::time::Duration;

use crate::errors::{ErrorKind, MarketDataError};

/// What happened when one candidate was tried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// The source was called (possibly several times) and failed.
    Failed { kind: ErrorKind, message: String },
    /// Circuit open; the source was not called.
    ShortCircuited,
}

/// Record of a single candidate attempt.
#[derive(Clone, Debug)]
pub struct SourceAttempt {
    pub source_id: String,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// Ordered attempt log of one logical request.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<SourceAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_success(&mut self, source_id: &str, elapsed: Duration) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            outcome: AttemptOutcome::Succeeded,
            elapsed,
        });
    }

    pub fn record_failure(&mut self, source_id: &str, error: &MarketDataError, elapsed: Duration) {
        let outcome = match error.kind() {
            ErrorKind::CircuitOpen => AttemptOutcome::ShortCircuited,
            kind => AttemptOutcome::Failed {
                kind,
                message: error.message().to_string(),
            },
        };
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            outcome,
            elapsed,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| match &a.outcome {
                AttemptOutcome::Succeeded => format!("{}: SUCCESS", a.source_id),
                AttemptOutcome::Failed { kind, message } => {
                    format!("{}: ERROR ({}: {})", a.source_id, kind, message)
                }
                AttemptOutcome::ShortCircuited => format!("{}: SKIPPED (circuit open)", a.source_id),
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Check if any source succeeded.
    pub fn has_success(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::Succeeded)
    }

    /// Sources skipped because their circuit was open.
    pub fn short_circuited(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::ShortCircuited)
            .map(|a| a.source_id.as_str())
            .collect()
    }
}
