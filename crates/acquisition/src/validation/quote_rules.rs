//! Quote rule sets.
//!
//! - Schema: identity fields present, no negative prices or volume
//! - Business: OHLC invariants (high >= low, open/close between low and high)
//! - Quality: zero volume, stale or future timestamps, extreme intraday
//!   range, prices above a sanity ceiling

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use super::issue::{Issue, IssueKind, IssueSeverity};
use super::pipeline::{RuleSet, Stage, ValidationContext, ValidationPipeline};
use crate::models::{CanonicalRecord, Quote, RecordKind};

/// Thresholds for the quote quality heuristics.
#[derive(Clone, Debug)]
pub struct QuoteQualityConfig {
    /// Maximum allowed price value (for sanity check).
    pub max_price: Option<Decimal>,
    /// Whether to warn on zero volume.
    pub warn_on_zero_volume: bool,
    /// Whether to warn on missing OHLC data.
    pub warn_on_missing_ohlc: bool,
    /// Quotes older than this are flagged as stale.
    pub max_staleness: Duration,
    /// Tolerated clock skew for timestamps in the future.
    pub max_future_skew: Duration,
    /// `(high - low) / low` above this is flagged as unusual volatility.
    pub max_intraday_range: Decimal,
}

impl Default for QuoteQualityConfig {
    fn default() -> Self {
        Self {
            max_price: Some(Decimal::from(1_000_000_000i64)), // 1 billion as sanity check
            warn_on_zero_volume: true,
            warn_on_missing_ohlc: false, // OHLC is optional
            // Covers a long weekend
            max_staleness: Duration::days(4),
            max_future_skew: Duration::minutes(5),
            max_intraday_range: Decimal::new(5, 1),
        }
    }
}

pub(super) fn register_defaults(pipeline: &mut ValidationPipeline) {
    pipeline.register(RecordKind::Quote, Stage::Schema, Arc::new(QuoteSchemaRules));
    pipeline.register(RecordKind::Quote, Stage::BusinessRule, Arc::new(QuoteBusinessRules));
    pipeline.register(
        RecordKind::Quote,
        Stage::Quality,
        Arc::new(QuoteQualityRules::default()),
    );
}

/// Required fields and non-negative values.
pub struct QuoteSchemaRules;

impl RuleSet for QuoteSchemaRules {
    fn name(&self) -> &'static str {
        "quote-schema"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(quote) = record.as_quote() else {
            return;
        };

        if quote.symbol.trim().is_empty() {
            issues.push(
                Issue::new(IssueKind::Completeness, IssueSeverity::Error, "Missing symbol")
                    .with_field("symbol"),
            );
        }
        if quote.currency.trim().is_empty() {
            issues.push(
                Issue::new(IssueKind::Completeness, IssueSeverity::Error, "Missing currency")
                    .with_field("currency"),
            );
        }

        let prices = [
            ("open", quote.open),
            ("high", quote.high),
            ("low", quote.low),
            ("close", Some(quote.close)),
        ];
        for (field, value) in prices {
            if let Some(value) = value.filter(|v| *v < Decimal::ZERO) {
                issues.push(
                    Issue::new(
                        IssueKind::Schema,
                        IssueSeverity::Error,
                        format!("Negative {} price: {}", field, value),
                    )
                    .with_field(field)
                    .with_observed(value)
                    .with_expected(">= 0"),
                );
            }
        }

        if let Some(volume) = quote.volume.filter(|v| *v < Decimal::ZERO) {
            issues.push(
                Issue::new(
                    IssueKind::Schema,
                    IssueSeverity::Error,
                    format!("Negative volume: {}", volume),
                )
                .with_field("volume")
                .with_observed(volume)
                .with_expected(">= 0"),
            );
        }
    }
}

/// OHLC invariants.
pub struct QuoteBusinessRules;

impl RuleSet for QuoteBusinessRules {
    fn name(&self) -> &'static str {
        "quote-business"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(quote) = record.as_quote() else {
            return;
        };
        let (Some(high), Some(low)) = (quote.high, quote.low) else {
            // No range to check against
            return;
        };

        if low > high {
            issues.push(
                Issue::new(
                    IssueKind::BusinessRule,
                    IssueSeverity::Error,
                    format!("Low ({}) is greater than High ({})", low, high),
                )
                .with_field("low")
                .with_observed(low)
                .with_expected(format!("<= {}", high)),
            );
            return;
        }

        let bounded = [("open", quote.open), ("close", Some(quote.close))];
        for (field, value) in bounded {
            if let Some(value) = value.filter(|v| *v < low || *v > high) {
                issues.push(
                    Issue::new(
                        IssueKind::BusinessRule,
                        IssueSeverity::Error,
                        format!(
                            "{} ({}) is outside Low/High range ({}-{})",
                            capitalize(field),
                            value,
                            low,
                            high
                        ),
                    )
                    .with_field(field)
                    .with_observed(value)
                    .with_expected(format!("{}..={}", low, high)),
                );
            }
        }
    }
}

/// Data-quality heuristics. Findings are warnings.
#[derive(Default)]
pub struct QuoteQualityRules {
    config: QuoteQualityConfig,
}

impl QuoteQualityRules {
    pub fn with_config(config: QuoteQualityConfig) -> Self {
        Self { config }
    }

    fn check_quote(&self, quote: &Quote, ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let warn = |message: String| Issue::new(IssueKind::Quality, IssueSeverity::Warning, message);

        if self.config.warn_on_zero_volume && quote.volume == Some(Decimal::ZERO) {
            issues.push(warn("Zero volume".to_string()).with_field("volume"));
        }

        if self.config.warn_on_missing_ohlc && !quote.has_full_bar() {
            issues.push(
                Issue::new(
                    IssueKind::Completeness,
                    IssueSeverity::Info,
                    "Missing OHLC data (only close provided)",
                )
                .with_field("open"),
            );
        }

        let age = ctx.now - quote.timestamp;
        if age > self.config.max_staleness {
            issues.push(
                warn(format!("Stale quote: {} hours old", age.num_hours()))
                    .with_field("timestamp")
                    .with_observed(quote.timestamp.to_rfc3339()),
            );
        } else if -age > self.config.max_future_skew {
            issues.push(
                warn("Quote timestamp is in the future".to_string())
                    .with_field("timestamp")
                    .with_observed(quote.timestamp.to_rfc3339()),
            );
        }

        match quote.relative_range() {
            Some(range) if range > self.config.max_intraday_range => {
                let percent = range
                    .checked_mul(Decimal::ONE_HUNDRED)
                    .map(|percent| format!("{}%", percent.round_dp(1)))
                    .unwrap_or_else(|| format!("{}x", range.round_dp(1)));
                issues.push(
                    warn(format!("Unusual intraday range: {}", percent))
                        .with_field("high")
                        .with_observed(range.round_dp(4))
                        .with_expected(format!("<= {}", self.config.max_intraday_range)),
                );
            }
            None if quote.has_ordered_range() => {
                issues.push(
                    warn("Unusual intraday range: too wide to measure".to_string())
                        .with_field("high")
                        .with_expected(format!("<= {}", self.config.max_intraday_range)),
                );
            }
            _ => {}
        }

        if let Some(max_price) = self.config.max_price {
            if quote.close > max_price {
                issues.push(
                    warn(format!("Close price {} exceeds sanity ceiling {}", quote.close, max_price))
                        .with_field("close")
                        .with_observed(quote.close),
                );
            }
        }
    }
}

impl RuleSet for QuoteQualityRules {
    fn name(&self) -> &'static str {
        "quote-quality"
    }

    fn check(&self, record: &CanonicalRecord, ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        if let Some(quote) = record.as_quote() {
            self.check_quote(quote, ctx, issues);
        }
    }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn run(rule_set: &dyn RuleSet, quote: Quote) -> Vec<Issue> {
        let mut issues = Vec::new();
        let record: CanonicalRecord = quote.into();
        rule_set.check(&record, &ValidationContext::new("TEST"), &mut issues);
        issues
    }

    fn quote() -> Quote {
        Quote::new("AAPL", Utc::now(), dec!(150.00), "USD")
    }

    #[test]
    fn test_valid_quote_has_no_issues() {
        let q = quote().with_ohlcv(dec!(148.00), dec!(152.00), dec!(147.00), dec!(1000000));
        assert!(run(&QuoteSchemaRules, q.clone()).is_empty());
        assert!(run(&QuoteBusinessRules, q.clone()).is_empty());
        assert!(run(&QuoteQualityRules::default(), q).is_empty());
    }

    #[test]
    fn test_close_only_quote_is_valid() {
        assert!(run(&QuoteSchemaRules, quote()).is_empty());
        assert!(run(&QuoteBusinessRules, quote()).is_empty());
    }

    #[test]
    fn test_negative_close_price() {
        let mut q = quote();
        q.close = dec!(-10.00);
        let issues = run(&QuoteSchemaRules, q);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("close"));
        assert!(issues[0].severity.is_blocking());
    }

    #[test]
    fn test_negative_volume() {
        let q = quote().with_ohlcv(dec!(150), dec!(151), dec!(149), dec!(-100));
        let issues = run(&QuoteSchemaRules, q);
        assert_eq!(issues[0].field.as_deref(), Some("volume"));
    }

    #[test]
    fn test_missing_identity_fields() {
        let q = Quote::new(" ", Utc::now(), dec!(1), "");
        let fields: Vec<_> = run(&QuoteSchemaRules, q)
            .into_iter()
            .filter_map(|issue| issue.field)
            .collect();
        assert_eq!(fields, vec!["symbol", "currency"]);
    }

    #[test]
    fn test_high_less_than_low() {
        let mut q = quote();
        q.high = Some(dec!(100.00));
        q.low = Some(dec!(150.00));
        q.close = dec!(120.00);

        let issues = run(&QuoteBusinessRules, q);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("Low (150.00) is greater than High (100.00)"));
        assert_eq!(issues[0].severity, IssueSeverity::Error);
    }

    #[test]
    fn test_close_outside_range() {
        let q = quote().with_ohlcv(dec!(148.00), dec!(149.00), dec!(147.00), dec!(10));
        let issues = run(&QuoteBusinessRules, q);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("close"));
        assert!(issues[0].message.starts_with("Close (150.00)"));
    }

    #[test]
    fn test_zero_volume_warning() {
        let q = quote().with_ohlcv(dec!(150), dec!(151), dec!(149), dec!(0));
        let issues = run(&QuoteQualityRules::default(), q);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert_eq!(issues[0].field.as_deref(), Some("volume"));
    }

    #[test]
    fn test_stale_and_future_timestamps() {
        let mut stale = quote();
        stale.timestamp = Utc::now() - Duration::days(10);
        let issues = run(&QuoteQualityRules::default(), stale);
        assert!(issues[0].message.starts_with("Stale quote"));

        let mut future = quote();
        future.timestamp = Utc::now() + Duration::hours(1);
        let issues = run(&QuoteQualityRules::default(), future);
        assert!(issues[0].message.contains("future"));
    }

    #[test]
    fn test_unusual_volatility() {
        let q = quote().with_ohlcv(dec!(100), dec!(200), dec!(100), dec!(10));
        let mut q = q;
        q.close = dec!(150);
        let issues = run(&QuoteQualityRules::default(), q);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("intraday range"));
    }

    #[test]
    fn test_extreme_range_warns_instead_of_overflowing() {
        let huge = Decimal::from_i128_with_scale(10i128.pow(27), 0);
        let mut q = quote().with_ohlcv(dec!(1), huge, dec!(1), dec!(10));
        q.close = dec!(1);
        let issues = run(&QuoteQualityRules::default(), q);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("intraday range"));
        assert_eq!(issues[0].severity, IssueSeverity::Warning);

        let mut q = quote().with_ohlcv(dec!(1), Decimal::MAX, Decimal::new(1, 28), dec!(10));
        q.close = dec!(1);
        let issues = run(&QuoteQualityRules::default(), q);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("too wide to measure"));
    }

    #[test]
    fn test_price_ceiling() {
        let rules = QuoteQualityRules::with_config(QuoteQualityConfig {
            max_price: Some(dec!(1000)),
            ..Default::default()
        });
        let mut q = quote();
        q.close = dec!(5000);
        let issues = run(&rules, q);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("close"));
    }

    #[test]
    fn test_other_record_kinds_are_ignored() {
        use crate::models::OrderBookSnapshot;
        let record: CanonicalRecord = OrderBookSnapshot {
            symbol: String::new(),
            timestamp: Utc::now(),
            bids: vec![],
            asks: vec![],
        }
        .into();
        let mut issues = Vec::new();
        QuoteSchemaRules.check(&record, &ValidationContext::new("T"), &mut issues);
        assert!(issues.is_empty());
    }
}
