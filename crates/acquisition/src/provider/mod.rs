//! Source adapter abstractions.
//!
//! This module contains:
//! - The `SourceAdapter` trait that every upstream integration implements
//! - Per-source limits and call settings (`SourceConfig`)
//! - A shared HTTP transport (`HttpFetcher`)
//!
//! # Architecture
//!
//! The adapter system is designed to be:
//! - **Source-agnostic**: The engine never sees provider-specific field names
//! - **Extensible**: New sources are added by implementing `SourceAdapter`
//! - **Resilient**: Rate limiting and circuit breakers wrap every adapter call

mod capabilities;
mod http;
mod traits;

pub use capabilities::SourceConfig;
pub use http::HttpFetcher;
pub use traits::SourceAdapter;
