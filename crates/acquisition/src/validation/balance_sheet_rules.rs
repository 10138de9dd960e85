//! Balance sheet rule sets.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use super::issue::{Issue, IssueKind, IssueSeverity};
use super::pipeline::{RuleSet, Stage, ValidationContext, ValidationPipeline};
use crate::models::{CanonicalRecord, RecordKind};

/// Allowed relative gap in `assets = liabilities + equity`.
const EQUATION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub(super) fn register_defaults(pipeline: &mut ValidationPipeline) {
    pipeline.register(
        RecordKind::BalanceSheet,
        Stage::Schema,
        Arc::new(BalanceSheetSchemaRules),
    );
    pipeline.register(
        RecordKind::BalanceSheet,
        Stage::BusinessRule,
        Arc::new(BalanceSheetBusinessRules),
    );
    pipeline.register(
        RecordKind::BalanceSheet,
        Stage::Quality,
        Arc::new(BalanceSheetQualityRules::default()),
    );
}

pub struct BalanceSheetSchemaRules;

impl RuleSet for BalanceSheetSchemaRules {
    fn name(&self) -> &'static str {
        "balance-sheet-schema"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(sheet) = record.as_balance_sheet() else {
            return;
        };

        if sheet.symbol.trim().is_empty() {
            issues.push(
                Issue::new(IssueKind::Completeness, IssueSeverity::Error, "Missing symbol")
                    .with_field("symbol"),
            );
        }

        if sheet.total_assets < Decimal::ZERO {
            issues.push(
                Issue::new(
                    IssueKind::Schema,
                    IssueSeverity::Error,
                    format!("Negative total assets: {}", sheet.total_assets),
                )
                .with_field("totalAssets")
                .with_observed(sheet.total_assets)
                .with_expected(">= 0"),
            );
        }

        let iso_shaped =
            sheet.currency.len() == 3 && sheet.currency.chars().all(|c| c.is_ascii_uppercase());
        if !iso_shaped {
            issues.push(
                Issue::new(
                    IssueKind::Schema,
                    IssueSeverity::Error,
                    format!("Currency '{}' is not an ISO 4217 code", sheet.currency),
                )
                .with_field("currency")
                .with_observed(&sheet.currency)
                .with_expected("three uppercase letters"),
            );
        }
    }
}

/// `assets = liabilities + equity` within 1% of total assets.
pub struct BalanceSheetBusinessRules;

impl RuleSet for BalanceSheetBusinessRules {
    fn name(&self) -> &'static str {
        "balance-sheet-business"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(sheet) = record.as_balance_sheet() else {
            return;
        };

        let (Some(claims), Some(imbalance)) = (sheet.claims(), sheet.imbalance()) else {
            issues.push(
                Issue::new(
                    IssueKind::Consistency,
                    IssueSeverity::Error,
                    "Balance sheet totals are out of range",
                )
                .with_field("totalAssets")
                .with_observed(sheet.total_assets),
            );
            return;
        };

        // Multiplying by the tolerance only shrinks the magnitude
        let allowed = sheet.total_assets.abs() * EQUATION_TOLERANCE;
        if imbalance.abs() > allowed {
            issues.push(
                Issue::new(
                    IssueKind::Consistency,
                    IssueSeverity::Error,
                    format!(
                        "Assets ({}) do not equal liabilities ({}) + equity ({})",
                        sheet.total_assets, sheet.total_liabilities, sheet.total_equity
                    ),
                )
                .with_field("totalAssets")
                .with_observed(claims)
                .with_expected(sheet.total_assets),
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct BalanceSheetQualityConfig {
    /// Period ends older than this are flagged.
    pub max_period_age: Duration,
}

impl Default for BalanceSheetQualityConfig {
    fn default() -> Self {
        Self {
            // Annual filings plus a reporting lag
            max_period_age: Duration::days(550),
        }
    }
}

/// Negative equity and stale reporting periods.
#[derive(Default)]
pub struct BalanceSheetQualityRules {
    config: BalanceSheetQualityConfig,
}

impl BalanceSheetQualityRules {
    pub fn with_config(config: BalanceSheetQualityConfig) -> Self {
        Self { config }
    }
}

impl RuleSet for BalanceSheetQualityRules {
    fn name(&self) -> &'static str {
        "balance-sheet-quality"
    }

    fn check(&self, record: &CanonicalRecord, ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(sheet) = record.as_balance_sheet() else {
            return;
        };

        if sheet.total_equity < Decimal::ZERO {
            issues.push(
                Issue::new(
                    IssueKind::Quality,
                    IssueSeverity::Warning,
                    format!("Negative equity: {}", sheet.total_equity),
                )
                .with_field("totalEquity"),
            );
        }

        let age = ctx.now.date_naive() - sheet.period_end;
        if age > self.config.max_period_age {
            issues.push(
                Issue::new(
                    IssueKind::Quality,
                    IssueSeverity::Warning,
                    format!("Stale period end: {}", sheet.period_end),
                )
                .with_field("periodEnd")
                .with_observed(sheet.period_end),
            );
        }
    }
}
