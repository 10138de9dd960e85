//! Normalization and validation of source payloads.
//!
//! Every payload goes through four stages:
//! 1. Normalize: the adapter parses the payload and maps it to a canonical record
//! 2. Schema: required fields, types, ranges
//! 3. Business rules: domain invariants (blocking)
//! 4. Quality: heuristics that only ever produce warnings
//!
//! Rule sets are registered per record kind and stage, so adding a record
//! kind never touches the driver.

mod balance_sheet_rules;
mod issue;
mod order_book_rules;
mod pipeline;
mod quote_rules;

pub use balance_sheet_rules::{
    BalanceSheetBusinessRules, BalanceSheetQualityConfig, BalanceSheetQualityRules,
    BalanceSheetSchemaRules,
};
pub use issue::{Issue, IssueKind, IssueSeverity, ValidationOutcome};
pub use order_book_rules::{
    OrderBookBusinessRules, OrderBookQualityConfig, OrderBookQualityRules, OrderBookSchemaRules,
};
pub use pipeline::{RuleSet, Stage, Validated, ValidationContext, ValidationPipeline};
pub use quote_rules::{QuoteBusinessRules, QuoteQualityConfig, QuoteQualityRules, QuoteSchemaRules};
