//! Order book rule sets.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use super::issue::{Issue, IssueKind, IssueSeverity};
use super::pipeline::{RuleSet, Stage, ValidationContext, ValidationPipeline};
use crate::models::{BookLevel, CanonicalRecord, RecordKind};

pub(super) fn register_defaults(pipeline: &mut ValidationPipeline) {
    pipeline.register(RecordKind::OrderBook, Stage::Schema, Arc::new(OrderBookSchemaRules));
    pipeline.register(
        RecordKind::OrderBook,
        Stage::BusinessRule,
        Arc::new(OrderBookBusinessRules),
    );
    pipeline.register(
        RecordKind::OrderBook,
        Stage::Quality,
        Arc::new(OrderBookQualityRules::default()),
    );
}

/// Non-empty symbol, non-negative prices and quantities.
pub struct OrderBookSchemaRules;

impl RuleSet for OrderBookSchemaRules {
    fn name(&self) -> &'static str {
        "order-book-schema"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(book) = record.as_order_book() else {
            return;
        };

        if book.symbol.trim().is_empty() {
            issues.push(
                Issue::new(IssueKind::Completeness, IssueSeverity::Error, "Missing symbol")
                    .with_field("symbol"),
            );
        }

        for (side, levels) in [("bids", &book.bids), ("asks", &book.asks)] {
            for (index, level) in levels.iter().enumerate() {
                if level.price < Decimal::ZERO || level.quantity < Decimal::ZERO {
                    issues.push(
                        Issue::new(
                            IssueKind::Schema,
                            IssueSeverity::Error,
                            format!(
                                "Negative price or quantity at {}[{}]: {} @ {}",
                                side, index, level.quantity, level.price
                            ),
                        )
                        .with_field(format!("{}[{}]", side, index)),
                    );
                }
            }
        }
    }
}

/// Sorted sides and an uncrossed book.
pub struct OrderBookBusinessRules;

impl OrderBookBusinessRules {
    fn check_sorted(
        side: &str,
        levels: &[BookLevel],
        in_order: impl Fn(Decimal, Decimal) -> bool,
        issues: &mut Vec<Issue>,
    ) {
        if let Some(index) = levels
            .windows(2)
            .position(|pair| !in_order(pair[0].price, pair[1].price))
        {
            issues.push(
                Issue::new(
                    IssueKind::BusinessRule,
                    IssueSeverity::Error,
                    format!("{} out of order at level {}", side, index + 1),
                )
                .with_field(format!("{}[{}]", side, index + 1))
                .with_observed(levels[index + 1].price),
            );
        }
    }
}

impl RuleSet for OrderBookBusinessRules {
    fn name(&self) -> &'static str {
        "order-book-business"
    }

    fn check(&self, record: &CanonicalRecord, _ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(book) = record.as_order_book() else {
            return;
        };

        Self::check_sorted("bids", &book.bids, |a, b| a > b, issues);
        Self::check_sorted("asks", &book.asks, |a, b| a < b, issues);

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            if bid.price >= ask.price {
                issues.push(
                    Issue::new(
                        IssueKind::BusinessRule,
                        IssueSeverity::Error,
                        format!("Crossed book: best bid {} >= best ask {}", bid.price, ask.price),
                    )
                    .with_field("bids[0]")
                    .with_observed(bid.price)
                    .with_expected(format!("< {}", ask.price)),
                );
            }
        }
    }
}

/// Thresholds for order book heuristics.
#[derive(Clone, Debug)]
pub struct OrderBookQualityConfig {
    /// `spread / mid` above this is flagged.
    pub max_relative_spread: Decimal,
    pub max_staleness: Duration,
}

impl Default for OrderBookQualityConfig {
    fn default() -> Self {
        Self {
            max_relative_spread: Decimal::new(5, 2),
            max_staleness: Duration::minutes(5),
        }
    }
}

/// Empty sides, wide spreads and stale snapshots.
#[derive(Default)]
pub struct OrderBookQualityRules {
    config: OrderBookQualityConfig,
}

impl OrderBookQualityRules {
    pub fn with_config(config: OrderBookQualityConfig) -> Self {
        Self { config }
    }
}

impl RuleSet for OrderBookQualityRules {
    fn name(&self) -> &'static str {
        "order-book-quality"
    }

    fn check(&self, record: &CanonicalRecord, ctx: &ValidationContext, issues: &mut Vec<Issue>) {
        let Some(book) = record.as_order_book() else {
            return;
        };

        for (side, levels) in [("bids", &book.bids), ("asks", &book.asks)] {
            if levels.is_empty() {
                issues.push(
                    Issue::new(
                        IssueKind::Completeness,
                        IssueSeverity::Warning,
                        format!("Empty {} side", side),
                    )
                    .with_field(side),
                );
            }
        }

        if let (Some(spread), Some(mid)) = (book.spread(), book.mid_price()) {
            let relative = (mid > Decimal::ZERO && spread > Decimal::ZERO)
                .then(|| spread.checked_div(mid))
                .flatten();
            if let Some(relative) = relative.filter(|r| *r > self.config.max_relative_spread) {
                let share = relative
                    .checked_mul(Decimal::ONE_HUNDRED)
                    .map(|percent| format!("{}% of mid", percent.round_dp(2)))
                    .unwrap_or_else(|| format!("{}x mid", relative.round_dp(2)));
                issues.push(
                    Issue::new(
                        IssueKind::Quality,
                        IssueSeverity::Warning,
                        format!("Wide spread: {} ({})", spread, share),
                    )
                    .with_observed(relative.round_dp(4))
                    .with_expected(format!("<= {}", self.config.max_relative_spread)),
                );
            }
        }

        if ctx.now - book.timestamp > self.config.max_staleness {
            issues.push(
                Issue::new(IssueKind::Quality, IssueSeverity::Warning, "Stale order book snapshot")
                    .with_field("timestamp")
                    .with_observed(book.timestamp.to_rfc3339()),
            );
        }
    }
}
