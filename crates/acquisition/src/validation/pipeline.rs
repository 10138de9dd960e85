//! Normalization and validation driver.
//!
//! The driver knows nothing about record contents. It runs the adapter's
//! mapping, then every rule set registered for the record kind, stage by
//! stage, and decides whether the record may be returned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::issue::{Issue, IssueKind, IssueSeverity, ValidationOutcome};
use super::{balance_sheet_rules, order_book_rules, quote_rules};
use crate::errors::{MarketDataError, ParseFailure};
use crate::models::{CanonicalRecord, RawPayload, RecordKind};
use crate::provider::SourceAdapter;

/// Validation stages, in the order they run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    /// Types, required fields, ranges.
    Schema,
    /// Domain invariants such as `low <= high`.
    BusinessRule,
    /// Heuristics; never blocking.
    Quality,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Schema, Stage::BusinessRule, Stage::Quality];
}

/// Facts about the call a rule may need besides the record itself.
#[derive(Clone, Debug)]
pub struct ValidationContext {
    pub source_id: String,
    pub now: DateTime<Utc>,
}

impl ValidationContext {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// A pluggable group of checks for one record kind and stage.
pub trait RuleSet: Send + Sync {
    fn name(&self) -> &'static str;

    /// Append any findings on `record` to `issues`.
    fn check(&self, record: &CanonicalRecord, ctx: &ValidationContext, issues: &mut Vec<Issue>);
}

/// A record that passed validation, with its non-blocking findings.
#[derive(Clone, Debug)]
pub struct Validated {
    pub record: CanonicalRecord,
    pub outcome: ValidationOutcome,
}

/// Registry of rule sets keyed by record kind and stage.
#[derive(Default)]
pub struct ValidationPipeline {
    rules: HashMap<(RecordKind, Stage), Vec<Arc<dyn RuleSet>>>,
}

impl ValidationPipeline {
    /// Empty pipeline: every record passes stages 2-4.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the built-in rule sets for every record kind.
    pub fn with_default_rules() -> Self {
        let mut pipeline = Self::new();
        quote_rules::register_defaults(&mut pipeline);
        order_book_rules::register_defaults(&mut pipeline);
        balance_sheet_rules::register_defaults(&mut pipeline);
        pipeline
    }

    /// Add a rule set; sets for the same kind and stage run in registration order.
    pub fn register(&mut self, kind: RecordKind, stage: Stage, rule_set: Arc<dyn RuleSet>) {
        self.rules.entry((kind, stage)).or_default().push(rule_set);
    }

    pub fn rule_sets(&self, kind: RecordKind, stage: Stage) -> &[Arc<dyn RuleSet>] {
        self.rules
            .get(&(kind, stage))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run stages 2-4 on an already canonical record.
    ///
    /// Quality findings are clamped to `warning` so they can never block.
    pub fn validate(&self, record: &CanonicalRecord, ctx: &ValidationContext) -> ValidationOutcome {
        let kind = record.kind();
        let mut issues = Vec::new();

        for stage in Stage::ALL {
            let start = issues.len();
            for rule_set in self.rule_sets(kind, stage) {
                rule_set.check(record, ctx, &mut issues);
            }

            if stage == Stage::Quality {
                for issue in &mut issues[start..] {
                    if issue.severity > IssueSeverity::Warning {
                        issue.severity = IssueSeverity::Warning;
                    }
                }
            }
        }

        ValidationOutcome::from_issues(issues)
    }

    /// Adapter mapping followed by validation.
    ///
    /// Fails with a `validation` error when the payload cannot be mapped or
    /// any blocking issue is found.
    pub fn normalize_and_validate(
        &self,
        adapter: &dyn SourceAdapter,
        payload: &RawPayload,
        kind: RecordKind,
    ) -> Result<Validated, MarketDataError> {
        let source_id = adapter.id();
        let record = adapter
            .parse(payload)
            .and_then(|raw| adapter.to_canonical(raw, kind))
            .map_err(|failure| MarketDataError::validation(source_id, vec![parse_issue(failure)]))?;

        if record.kind() != kind {
            let issue = Issue::new(
                IssueKind::Schema,
                IssueSeverity::Critical,
                format!("adapter produced {} for a {} request", record.kind(), kind),
            )
            .with_observed(record.kind())
            .with_expected(kind);
            return Err(MarketDataError::validation(source_id, vec![issue]));
        }

        let outcome = self.validate(&record, &ValidationContext::new(source_id));
        if !outcome.valid {
            debug!(
                "'{}' {} for {} rejected with {} error(s)",
                source_id,
                kind,
                record.symbol(),
                outcome.errors.len()
            );
            return Err(MarketDataError::validation(source_id, outcome.errors));
        }

        for issue in &outcome.warnings {
            warn!(
                "{} validation warning for {} from '{}': {}",
                kind,
                record.symbol(),
                source_id,
                issue.message
            );
        }

        Ok(Validated { record, outcome })
    }
}

fn parse_issue(failure: ParseFailure) -> Issue {
    let issue = Issue::new(
        IssueKind::Schema,
        IssueSeverity::Critical,
        format!("could not map payload: {}", failure),
    );
    match failure.field {
        Some(field) => issue.with_field(field),
        None => issue,
    }
}
