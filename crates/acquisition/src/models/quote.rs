use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical price observation for one instrument.
///
/// Only `close` is mandatory; sources that publish a last-trade price and
/// nothing else leave the rest of the bar empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
    /// Last traded or closing price
    pub close: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    /// ISO 4217 code the prices are quoted in
    pub currency: String,
}

impl Quote {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        close: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
            currency: currency.into(),
        }
    }

    /// Fill in the rest of the bar.
    pub fn with_ohlcv(mut self, open: Decimal, high: Decimal, low: Decimal, volume: Decimal) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.volume = Some(volume);
        self
    }

    /// `(high - low) / low`, when both bounds are present, ordered and `low` is positive.
    ///
    /// `None` also when the ratio does not fit in a `Decimal`.
    pub fn relative_range(&self) -> Option<Decimal> {
        match (self.high, self.low) {
            (Some(high), Some(low)) if low > Decimal::ZERO && high >= low => {
                high.checked_sub(low)?.checked_div(low)
            }
            _ => None,
        }
    }

    /// Whether `high` and `low` are both present, ordered and `low` is positive.
    pub fn has_ordered_range(&self) -> bool {
        matches!((self.high, self.low), (Some(high), Some(low)) if low > Decimal::ZERO && high >= low)
    }

    pub fn has_full_bar(&self) -> bool {
        self.open.is_some() && self.high.is_some() && self.low.is_some()
    }
}
