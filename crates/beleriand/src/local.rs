//! Local (in-process) store backing the near-cache.
//!
//! The invalidation protocol only needs get/insert/remove/clear over
//! `localized key -> LocalEntry`, so the storage is swappable:
//!
//! - [`DashMapLocalStore`]: unbounded concurrent map
//! - [`MokaLocalStore`]: bounded, evicts by TinyLFU once `max_entries` is reached

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use moka::ops::compute::Op;
use moka::sync::Cache as MokaCache;

use crate::entry::LocalEntry;

/// Thread-safe map of localized keys to local entries.
///
/// Reads, writes and invalidation-driven clears run concurrently from caller
/// tasks and the subscription task.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<LocalEntry>;

    /// Store `entry` unless the key already holds an entry with a later
    /// version.
    fn insert_if_newer(&self, key: String, entry: LocalEntry);

    fn remove(&self, key: &str);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded local store on top of `DashMap`.
#[derive(Default)]
pub struct DashMapLocalStore {
    entries: DashMap<String, LocalEntry>,
}

impl DashMapLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for DashMapLocalStore {
    fn get(&self, key: &str) -> Option<LocalEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn insert_if_newer(&self, key: String, entry: LocalEntry) {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if entry.supersedes(occupied.get()) {
                    occupied.insert(entry);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded local store on top of `moka`.
pub struct MokaLocalStore {
    entries: MokaCache<String, LocalEntry>,
}

impl MokaLocalStore {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: MokaCache::builder().max_capacity(max_entries).build(),
        }
    }
}

impl LocalStore for MokaLocalStore {
    fn get(&self, key: &str) -> Option<LocalEntry> {
        self.entries.get(key)
    }

    fn insert_if_newer(&self, key: String, entry: LocalEntry) {
        let _ = self.entries.entry(key).and_compute_with(|existing| match existing {
            Some(existing) if !entry.supersedes(existing.value()) => Op::Nop,
            _ => Op::Put(entry),
        });
    }

    fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    fn clear(&self) {
        self.entries.invalidate_all();
    }

    fn len(&self) -> usize {
        // moka applies writes lazily; flush them so the count is exact
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(slot: u16, written_at: i64) -> LocalEntry {
        LocalEntry::new(slot, written_at, Arc::new(b"payload".to_vec()))
    }

    fn exercise(store: &dyn LocalStore) {
        assert!(store.is_empty());
        assert!(store.get("Config:1").is_none());

        store.insert_if_newer("Config:1".into(), entry(1, 10));
        store.insert_if_newer("Config:2".into(), entry(2, 20));
        assert_eq!(store.len(), 2);

        let hit = store.get("Config:1").unwrap();
        assert_eq!(hit.slot(), 1);
        assert_eq!(hit.written_at(), 10);
        assert_eq!(hit.payload().as_slice(), b"payload");

        // Replaced wholesale
        store.insert_if_newer("Config:1".into(), entry(1, 30));
        assert_eq!(store.get("Config:1").unwrap().written_at(), 30);

        // An older version never replaces a newer one
        store.insert_if_newer("Config:1".into(), entry(1, 5));
        assert_eq!(store.get("Config:1").unwrap().written_at(), 30);

        store.remove("Config:1");
        assert!(store.get("Config:1").is_none());
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.get("Config:2").is_none());
    }

    #[test]
    fn test_dashmap_store() {
        let store = DashMapLocalStore::new();
        exercise(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_moka_store() {
        exercise(&MokaLocalStore::new(100));
    }

    #[test]
    fn test_version_orders_inserts_not_written_at() {
        let store = DashMapLocalStore::new();
        let acked_write = LocalEntry::new(1, 10, Arc::new(b"new".to_vec())).with_version(50);
        let late_read = LocalEntry::new(1, 20, Arc::new(b"old".to_vec()));

        store.insert_if_newer("Config:1".into(), acked_write);
        store.insert_if_newer("Config:1".into(), late_read);

        let kept = store.get("Config:1").unwrap();
        assert_eq!(kept.payload().as_slice(), b"new");
        assert_eq!(kept.written_at(), 10);
    }

    #[test]
    fn test_moka_store_is_bounded() {
        let store = MokaLocalStore::new(10);
        for i in 0..200 {
            store.insert_if_newer(format!("k{i}"), entry(0, i));
        }
        assert!(store.len() <= 10);
    }
}
