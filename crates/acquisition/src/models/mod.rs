//! Market data models
//!
//! This module contains the data types that flow through the engine:
//! - `types` - Type aliases for common identifiers (SourceId, RequestKey)
//! - `quote` - OHLCV quote (Quote)
//! - `order_book` - Bid/ask ladder snapshot (OrderBookSnapshot, BookLevel)
//! - `financials` - Balance-sheet totals (BalanceSheet)
//! - `record` - Raw payloads on the way in, canonical records and response metadata on the way out

mod financials;
mod order_book;
mod quote;
mod record;
mod types;

pub use financials::BalanceSheet;
pub use order_book::{BookLevel, OrderBookSnapshot};
pub use quote::Quote;
pub use record::{
    CanonicalRecord, FetchedRecord, OperationParams, RawPayload, RawRecord, RecordKind,
    ResponseMeta,
};
pub use types::{RequestKey, SourceId};
