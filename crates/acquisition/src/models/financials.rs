use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance-sheet totals for one reporting period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheet {
    pub symbol: String,
    pub period_end: NaiveDate,
    pub currency: String,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub total_equity: Decimal,
}

impl BalanceSheet {
    /// `liabilities + equity`, or `None` when the sum overflows.
    pub fn claims(&self) -> Option<Decimal> {
        self.total_liabilities.checked_add(self.total_equity)
    }

    /// `assets - (liabilities + equity)`; zero for a balanced sheet.
    /// `None` when the totals are too large to compare.
    pub fn imbalance(&self) -> Option<Decimal> {
        self.total_assets.checked_sub(self.claims()?)
    }
}
