use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BalanceSheet, OrderBookSnapshot, Quote, SourceId};
use crate::validation::Issue;

/// Kind of canonical record a request asks for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Quote,
    OrderBook,
    BalanceSheet,
}

impl RecordKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "QUOTE",
            Self::OrderBook => "ORDER_BOOK",
            Self::BalanceSheet => "BALANCE_SHEET",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized record, independent of the source that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalRecord {
    Quote(Quote),
    OrderBook(OrderBookSnapshot),
    BalanceSheet(BalanceSheet),
}

impl CanonicalRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Quote(_) => RecordKind::Quote,
            Self::OrderBook(_) => RecordKind::OrderBook,
            Self::BalanceSheet(_) => RecordKind::BalanceSheet,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(quote) => &quote.symbol,
            Self::OrderBook(book) => &book.symbol,
            Self::BalanceSheet(sheet) => &sheet.symbol,
        }
    }

    pub fn as_quote(&self) -> Option<&Quote> {
        match self {
            Self::Quote(quote) => Some(quote),
            _ => None,
        }
    }

    pub fn as_order_book(&self) -> Option<&OrderBookSnapshot> {
        match self {
            Self::OrderBook(book) => Some(book),
            _ => None,
        }
    }

    pub fn as_balance_sheet(&self) -> Option<&BalanceSheet> {
        match self {
            Self::BalanceSheet(sheet) => Some(sheet),
            _ => None,
        }
    }
}

impl From<Quote> for CanonicalRecord {
    fn from(quote: Quote) -> Self {
        Self::Quote(quote)
    }
}

impl From<OrderBookSnapshot> for CanonicalRecord {
    fn from(book: OrderBookSnapshot) -> Self {
        Self::OrderBook(book)
    }
}

impl From<BalanceSheet> for CanonicalRecord {
    fn from(sheet: BalanceSheet) -> Self {
        Self::BalanceSheet(sheet)
    }
}

/// Opaque bytes exactly as an upstream returned them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawPayload {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl RawPayload {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            body: value.to_string().into_bytes(),
            content_type: Some("application/json".to_string()),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Provider-shaped record produced by an adapter's `parse`.
///
/// Stays opaque to everything except the adapter that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRecord(pub serde_json::Value);

impl RawRecord {
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

/// What to fetch from a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationParams {
    pub kind: RecordKind,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl OperationParams {
    pub fn new(kind: RecordKind, symbol: impl Into<String>) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn quote(symbol: impl Into<String>) -> Self {
        Self::new(RecordKind::Quote, symbol)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Metadata attached to every record returned by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub source_id: SourceId,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub elapsed_ms: u64,
    pub from_cache: bool,
}

/// Validated record plus the non-blocking issues found on it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedRecord {
    pub record: CanonicalRecord,
    pub warnings: Vec<Issue>,
    pub meta: ResponseMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_canonical_record_kind_and_symbol() {
        let record: CanonicalRecord = Quote::new("MSFT", Utc::now(), dec!(410), "USD").into();
        assert_eq!(record.kind(), RecordKind::Quote);
        assert_eq!(record.symbol(), "MSFT");
        assert!(record.as_quote().is_some());
        assert!(record.as_order_book().is_none());
    }

    #[test]
    fn test_canonical_record_serializes_tagged() {
        let record: CanonicalRecord = Quote::new("MSFT", Utc::now(), dec!(410), "USD").into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "QUOTE");
        assert_eq!(json["data"]["symbol"], "MSFT");
    }

    #[test]
    fn test_json_payload() {
        let payload = RawPayload::json(&serde_json::json!({"c": 1.5}));
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert_eq!(payload.as_str(), Some(r#"{"c":1.5}"#));
    }
}
