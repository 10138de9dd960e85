use std::fmt;

use serde::{Deserialize, Serialize};

/// Which family of check produced an issue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    Schema,
    BusinessRule,
    Quality,
    Consistency,
    Completeness,
}

/// Issue severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl IssueSeverity {
    /// `Error` and `Critical` issues reject the record.
    pub fn is_blocking(self) -> bool {
        self >= Self::Error
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single finding on a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            field: None,
            message: message.into(),
            observed_value: None,
            expected_value: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_observed(mut self, observed: impl ToString) -> Self {
        self.observed_value = Some(observed.to_string());
        self
    }

    pub fn with_expected(mut self, expected: impl ToString) -> Self {
        self.expected_value = Some(expected.to_string());
        self
    }
}

/// Result of running every stage on one record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationOutcome {
    /// Split issues into blocking errors and non-blocking warnings.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity.is_blocking());

        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_partitions_by_severity() {
        let outcome = ValidationOutcome::from_issues(vec![
            Issue::new(IssueKind::Quality, IssueSeverity::Warning, "zero volume"),
            Issue::new(IssueKind::BusinessRule, IssueSeverity::Error, "low > high"),
            Issue::new(IssueKind::Quality, IssueSeverity::Info, "note"),
            Issue::new(IssueKind::Schema, IssueSeverity::Critical, "missing close"),
        ]);

        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_outcome_without_blocking_issues_is_valid() {
        let outcome = ValidationOutcome::from_issues(vec![Issue::new(
            IssueKind::Quality,
            IssueSeverity::Warning,
            "stale",
        )]);
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_issue_serializes_camel_case() {
        let issue = Issue::new(IssueKind::BusinessRule, IssueSeverity::Error, "low > high")
            .with_field("low")
            .with_observed(150)
            .with_expected("<= 100");
        let json = serde_json::to_value(&issue).unwrap();

        assert_eq!(json["kind"], "business-rule");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["observedValue"], "150");
        assert_eq!(json["expectedValue"], "<= 100");
    }
}
