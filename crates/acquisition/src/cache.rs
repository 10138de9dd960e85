//! Record cache keyed by request key.
//!
//! The engine only needs `get`/`set`; any concurrency-safe store can sit
//! behind [`RecordCache`]. [`InMemoryRecordCache`] is the in-process one,
//! built on moka with a per-entry TTL and a capacity bound.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use moka::future::Cache;
use moka::Expiry;

use crate::models::FetchedRecord;

/// Default upper bound on cached records.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Cache collaborator used by the engine.
#[async_trait]
pub trait RecordCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<FetchedRecord>;

    /// Store `record` for `ttl`. A zero TTL stores nothing.
    async fn set(&self, key: &str, record: FetchedRecord, ttl: Duration);
}

#[derive(Clone, Debug)]
struct CachedEntry {
    record: FetchedRecord,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    // Overwriting a key restarts its lifetime with the new TTL
    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory TTL cache with bounded capacity.
pub struct InMemoryRecordCache {
    entries: Cache<String, CachedEntry>,
}

impl InMemoryRecordCache {
    pub fn new() -> Self {
        Self::with_max_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Cache holding at most `max_entries` records; the least useful are evicted first.
    pub fn with_max_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Remove a single entry.
    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    /// Apply pending evictions now, expired entries included.
    ///
    /// moka also does this in the background as the cache is used.
    pub async fn purge_expired(&self) {
        self.entries.run_pending_tasks().await;
        debug!("Record cache holds {} entries after purge", self.entries.entry_count());
    }

    /// Entries held, as of the last maintenance pass.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl Default for InMemoryRecordCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordCache for InMemoryRecordCache {
    async fn get(&self, key: &str) -> Option<FetchedRecord> {
        self.entries.get(key).await.map(|entry| entry.record)
    }

    async fn set(&self, key: &str, record: FetchedRecord, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries
            .insert(key.to_string(), CachedEntry { record, ttl })
            .await;
    }
}
