//! Per-source state map.
//!
//! The outer lock is only held long enough to find or insert a source's
//! slot; all real work happens under that slot's own mutex, so calls for
//! different sources never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::warn;

pub(crate) struct SourceMap<T> {
    slots: RwLock<HashMap<String, Arc<Mutex<T>>>>,
    label: &'static str,
}

impl<T> SourceMap<T> {
    /// `label` names the owning component in poison warnings.
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            label,
        }
    }

    /// The slot for `source`, created with `init` on first use.
    pub(crate) fn entry(&self, source: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        if let Some(slot) = self.get(source) {
            return slot;
        }

        let mut slots = self.slots.write().unwrap_or_else(|poisoned| {
            warn!("{} source map lock was poisoned, recovering", self.label);
            poisoned.into_inner()
        });
        slots
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub(crate) fn get(&self, source: &str) -> Option<Arc<Mutex<T>>> {
        let slots = self.slots.read().unwrap_or_else(|poisoned| {
            warn!("{} source map lock was poisoned, recovering", self.label);
            poisoned.into_inner()
        });
        slots.get(source).cloned()
    }

    pub(crate) fn remove(&self, source: &str) -> Option<Arc<Mutex<T>>> {
        let mut slots = self.slots.write().unwrap_or_else(|poisoned| {
            warn!("{} source map lock was poisoned, recovering", self.label);
            poisoned.into_inner()
        });
        slots.remove(source)
    }

    /// Every known source with its slot, sorted by source id.
    pub(crate) fn snapshot(&self) -> Vec<(String, Arc<Mutex<T>>)> {
        let slots = self.slots.read().unwrap_or_else(|poisoned| {
            warn!("{} source map lock was poisoned, recovering", self.label);
            poisoned.into_inner()
        });
        let mut entries: Vec<_> = slots
            .iter()
            .map(|(source, slot)| (source.clone(), slot.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Lock one slot, recovering from poison.
    pub(crate) fn lock<'a>(&self, slot: &'a Mutex<T>) -> MutexGuard<'a, T> {
        slot.lock().unwrap_or_else(|poisoned| {
            warn!("{} mutex was poisoned, recovering", self.label);
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_initializes_once() {
        let map: SourceMap<u32> = SourceMap::new("test");

        let first = map.entry("A", || 1);
        *map.lock(&first) += 10;

        let again = map.entry("A", || 99);
        assert_eq!(*map.lock(&again), 11);
    }

    #[test]
    fn test_sources_are_independent() {
        let map: SourceMap<u32> = SourceMap::new("test");
        let a = map.entry("A", || 0);
        let _held = map.lock(&a);

        // B must be reachable while A is locked
        let b = map.entry("B", || 5);
        assert_eq!(*map.lock(&b), 5);
    }

    #[test]
    fn test_snapshot_sorted_and_remove() {
        let map: SourceMap<u32> = SourceMap::new("test");
        map.entry("C", || 3);
        map.entry("A", || 1);

        let ids: Vec<_> = map.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["A", "C"]);

        assert!(map.remove("A").is_some());
        assert!(map.get("A").is_none());
    }
}
