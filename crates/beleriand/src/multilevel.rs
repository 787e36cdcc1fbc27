//! Multi-level cache: local store in front of a shared store, kept fresh by
//! slot invalidations.
//!
//! ## Read path
//!
//! ```text
//! get("1") → local["Config:1"] fresh? ──yes──▶ value (no round trip)
//!                 │no / absent
//!                 ▼
//!            shared GET "Config:1" ──found──▶ seed local entry ─▶ value
//!                 │absent
//!                 ▼
//!               None
//! ```
//!
//! A local entry is fresh while its write time is later than the last
//! invalidation recorded for its slot.
//!
//! ## Write path
//!
//! `set` stores the value and publishes `{sender, slot}` on the update channel
//! in one atomic unit, then replaces the local entry. Peers mark the slot;
//! the writer ignores its own message.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{Cache, CacheStore};
use crate::clock;
use crate::codec::Payload;
use crate::config::CacheSettings;
use crate::entry::LocalEntry;
use crate::error::{CacheError, Result};
use crate::flight::KeyLocks;
use crate::listener;
use crate::local::LocalStore;
use crate::message::InvalidationMessage;
use crate::metrics;
use crate::shared::SharedStore;
use crate::slot::{self, HashSlot, SlotTable};

/// Pub/sub channels of one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub update: String,
    pub clear: String,
}

impl Channels {
    pub fn new(prefix: &str, cache: &str) -> Self {
        Self {
            update: format!("{prefix}:sync:{cache}"),
            clear: format!("{prefix}:clear:{cache}"),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.update.clone(), self.clear.clone()]
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    invalidations_applied: AtomicU64,
    invalidations_ignored: AtomicU64,
    clears_applied: AtomicU64,
}

impl Counters {
    fn local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidation_applied(&self) {
        self.invalidations_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidation_ignored(&self) {
        self.invalidations_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear_applied(&self) {
        self.clears_applied.fetch_add(1, Ordering::Relaxed);
    }
}

/// State touched by both caller operations and the subscription task.
pub(crate) struct CacheState {
    pub name: String,
    pub instance_id: Uuid,
    pub channels: Channels,
    pub local: Arc<dyn LocalStore>,
    pub slots: SlotTable,
    pub counters: Counters,
    /// Time of the last clear applied here. Entries written before it are
    /// stale whatever the slot table says, including ones seeded by a fetch
    /// that was still in flight when the clear happened.
    cleared_at: AtomicI64,
}

impl CacheState {
    /// Whether `entry` may be served without a round trip.
    pub fn is_fresh(&self, entry: &LocalEntry) -> bool {
        entry.written_at() > self.cleared_at.load(Ordering::Acquire)
            && self.slots.is_fresh(entry.slot(), entry.written_at())
    }

    /// Drop every local entry and reset the slot table, as of `at`.
    pub fn wipe(&self, at: i64) {
        self.cleared_at.fetch_max(at, Ordering::AcqRel);
        self.local.clear();
        self.slots.reset();
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub name: String,
    /// Entries currently held in the local store.
    pub local_entries: usize,
    /// Reads served from the local store.
    pub local_hits: u64,
    /// Reads served from the shared store.
    pub shared_hits: u64,
    /// Reads that found nothing in either level.
    pub misses: u64,
    /// Peer invalidations applied to the slot table.
    pub invalidations_applied: u64,
    /// Own invalidations received back and skipped.
    pub invalidations_ignored: u64,
    /// Clear messages applied.
    pub clears_applied: u64,
}

impl CacheStats {
    /// Share of reads answered without a shared-store round trip, in percent.
    pub fn local_hit_rate(&self) -> f64 {
        let total = self.local_hits + self.shared_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.local_hits as f64 / total as f64) * 100.0
        }
    }
}

/// A named multi-level cache.
///
/// One instance per cache name per process (see [`crate::CacheManager`]). Each
/// instance owns its local store and slot table; the shared store is shared.
pub struct MultiLevelCache {
    state: Arc<CacheState>,
    shared: Arc<dyn SharedStore>,
    key_locks: KeyLocks,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MultiLevelCache {
    /// Create the cache and subscribe to its invalidation channels.
    ///
    /// Returns once the subscription is active, so no invalidation published
    /// after construction can be missed. Must be called within a Tokio runtime.
    pub async fn new(
        name: impl Into<String>,
        shared: Arc<dyn SharedStore>,
        local: Arc<dyn LocalStore>,
        settings: &CacheSettings,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::InvalidName(name));
        }

        let channels = Channels::new(&settings.channel_prefix, &name);
        let stream = shared.subscribe(&channels.all()).await?;

        let state = Arc::new(CacheState {
            name,
            instance_id: Uuid::new_v4(),
            channels,
            local,
            slots: SlotTable::new(),
            counters: Counters::default(),
            cleared_at: AtomicI64::new(i64::MIN),
        });

        let shutdown = CancellationToken::new();
        let handle = listener::spawn(
            Arc::clone(&state),
            Arc::clone(&shared),
            stream,
            shutdown.clone(),
        );

        tracing::info!(
            cache = %state.name,
            instance_id = %state.instance_id,
            update_channel = %state.channels.update,
            clear_channel = %state.channels.clear,
            "multi-level cache created"
        );

        Ok(Self {
            state,
            shared,
            key_locks: KeyLocks::new(),
            shutdown,
            listener: Mutex::new(Some(handle)),
        })
    }

    /// Id stamped on every invalidation this instance publishes.
    pub fn instance_id(&self) -> Uuid {
        self.state.instance_id
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.state.counters;
        let local_entries = self.state.local.len();
        metrics::set_local_entries(&self.state.name, local_entries);
        CacheStats {
            name: self.state.name.clone(),
            local_entries,
            local_hits: counters.local_hits.load(Ordering::Relaxed),
            shared_hits: counters.shared_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            invalidations_applied: counters.invalidations_applied.load(Ordering::Relaxed),
            invalidations_ignored: counters.invalidations_ignored.load(Ordering::Relaxed),
            clears_applied: counters.clears_applied.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop listening for invalidations and drop all local state.
    ///
    /// Later operations fail with [`CacheError::Shutdown`]. Values in the
    /// shared store are left alone.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(cache = %self.state.name, error = %e, "invalidation listener panicked");
            }
        }
        self.state.wipe(clock::now());
        tracing::info!(cache = %self.state.name, "multi-level cache shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Shutdown(self.state.name.clone()));
        }
        Ok(())
    }

    /// `"{name}:{key}"`, the key used in both store levels.
    fn localize(&self, key: &str) -> Result<String> {
        if key.trim().is_empty() {
            return Err(CacheError::invalid_key(key));
        }
        Ok(format!("{}:{}", self.state.name, key))
    }

    /// Fresh local payload for `key`, or the slot of a stale entry.
    fn lookup_local(&self, key: &str) -> std::result::Result<Payload, Option<HashSlot>> {
        match self.state.local.get(key) {
            Some(entry) if self.state.is_fresh(&entry) => {
                Ok(Arc::clone(entry.payload()))
            }
            Some(entry) => Err(Some(entry.slot())),
            None => Err(None),
        }
    }

    fn invalidation(&self, slot: HashSlot) -> Result<Vec<u8>> {
        InvalidationMessage::slot(self.state.instance_id, slot).encode()
    }
}

impl Drop for MultiLevelCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CacheStore for MultiLevelCache {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn get_payload(&self, key: &str) -> Result<Option<Payload>> {
        self.ensure_open()?;
        let key = self.localize(key)?;
        // Taken before the round trip: an invalidation racing the fetch wins
        let timestamp = clock::now();

        let stale_slot = match self.lookup_local(&key) {
            Ok(payload) => {
                self.state.counters.local_hit();
                metrics::record_cache_hit(&self.state.name, "local");
                tracing::trace!(key = %key, "cache hit (local)");
                return Ok(Some(payload));
            }
            Err(stale_slot) => stale_slot,
        };

        match self.shared.get(&key).await? {
            Some(bytes) if !bytes.is_empty() => {
                let slot = stale_slot.unwrap_or_else(|| slot::calculate(&key));
                let payload: Payload = Arc::new(bytes);
                let entry = LocalEntry::new(slot, timestamp, Arc::clone(&payload));
                self.state.local.insert_if_newer(key.clone(), entry);
                self.state.counters.shared_hit();
                metrics::record_cache_hit(&self.state.name, "shared");
                tracing::debug!(key = %key, slot, "cache hit (shared)");
                Ok(Some(payload))
            }
            _ => {
                if stale_slot.is_some() {
                    self.state.local.remove(&key);
                }
                self.state.counters.miss();
                metrics::record_cache_miss(&self.state.name);
                tracing::debug!(key = %key, "cache miss");
                Ok(None)
            }
        }
    }

    async fn get_payloads(&self, keys: &[String]) -> Result<HashMap<String, Payload>> {
        self.ensure_open()?;
        let mut seen = HashSet::new();
        let mut localized = Vec::with_capacity(keys.len());
        for key in keys {
            if seen.insert(key.as_str()) {
                localized.push((key.as_str(), self.localize(key)?));
            }
        }
        let timestamp = clock::now();

        let mut found = HashMap::with_capacity(localized.len());
        let mut pending = Vec::new();
        for (raw, key) in localized {
            match self.lookup_local(&key) {
                Ok(payload) => {
                    self.state.counters.local_hit();
                    metrics::record_cache_hit(&self.state.name, "local");
                    found.insert(raw.to_string(), payload);
                }
                Err(stale_slot) => pending.push((raw, key, stale_slot)),
            }
        }
        if pending.is_empty() {
            return Ok(found);
        }

        let fetch: Vec<String> = pending.iter().map(|(_, key, _)| key.clone()).collect();
        let values = self.shared.get_many(&fetch).await?;

        for ((raw, key, stale_slot), value) in pending.into_iter().zip(values) {
            match value {
                Some(bytes) if !bytes.is_empty() => {
                    let slot = stale_slot.unwrap_or_else(|| slot::calculate(&key));
                    let payload: Payload = Arc::new(bytes);
                    let entry = LocalEntry::new(slot, timestamp, Arc::clone(&payload));
                    self.state.local.insert_if_newer(key, entry);
                    self.state.counters.shared_hit();
                    metrics::record_cache_hit(&self.state.name, "shared");
                    found.insert(raw.to_string(), payload);
                }
                _ => {
                    if stale_slot.is_some() {
                        self.state.local.remove(&key);
                    }
                    self.state.counters.miss();
                    metrics::record_cache_miss(&self.state.name);
                }
            }
        }

        tracing::debug!(
            cache = %self.state.name,
            requested = keys.len(),
            fetched = fetch.len(),
            resolved = found.len(),
            "batch read"
        );
        Ok(found)
    }

    async fn set_payload(&self, key: &str, payload: Payload) -> Result<()> {
        self.ensure_open()?;
        let key = self.localize(key)?;
        let slot = slot::calculate(&key);
        let timestamp = clock::now();
        let message = self.invalidation(slot)?;

        self.shared
            .set_and_publish(&key, payload.as_slice(), &self.state.channels.update, &message)
            .await?;
        // A read that fetched before this write may still be seeding; it
        // carries an older version and loses
        let entry = LocalEntry::new(slot, timestamp, payload).with_version(clock::now());
        self.state.local.insert_if_newer(key.clone(), entry);

        tracing::debug!(key = %key, slot, "cache set");
        Ok(())
    }

    async fn set_payloads(&self, payloads: Vec<(String, Payload)>) -> Result<()> {
        self.ensure_open()?;
        if payloads.is_empty() {
            return Ok(());
        }
        let timestamp = clock::now();

        let mut entries = Vec::with_capacity(payloads.len());
        let mut locals = Vec::with_capacity(payloads.len());
        let mut slots = BTreeSet::new();
        for (key, payload) in payloads {
            let key = self.localize(&key)?;
            let slot = slot::calculate(&key);
            slots.insert(slot);
            entries.push((key.clone(), payload.to_vec()));
            locals.push((key, slot, payload));
        }
        let messages = slots
            .iter()
            .map(|slot| self.invalidation(*slot))
            .collect::<Result<Vec<_>>>()?;

        self.shared
            .set_many_and_publish(&entries, &self.state.channels.update, &messages)
            .await?;
        let acknowledged = clock::now();
        for (key, slot, payload) in locals {
            let entry = LocalEntry::new(slot, timestamp, payload).with_version(acknowledged);
            self.state.local.insert_if_newer(key, entry);
        }

        tracing::debug!(
            cache = %self.state.name,
            keys = entries.len(),
            slots = slots.len(),
            "cache batch set"
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let key = self.localize(key)?;
        let slot = slot::calculate(&key);
        let message = self.invalidation(slot)?;

        self.shared
            .delete_and_publish(&key, &self.state.channels.update, &message)
            .await?;
        // Our own message is ignored on arrival, so mark the slot here: a
        // read that fetched the old value before the delete must not seed it
        self.state.slots.mark(slot, clock::now());
        self.state.local.remove(&key);

        tracing::debug!(key = %key, slot, "cache remove");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let message = InvalidationMessage::clear_all(self.state.instance_id).encode()?;
        let prefix = format!("{}:", self.state.name);

        let deleted = self
            .shared
            .delete_prefix_and_publish(&prefix, &self.state.channels.clear, &message)
            .await?;
        // Don't wait for our own clear message to come back
        self.state.wipe(clock::now());

        tracing::info!(cache = %self.state.name, deleted, "cache cleared");
        Ok(())
    }
}

impl Cache for MultiLevelCache {
    fn key_locks(&self) -> &KeyLocks {
        &self.key_locks
    }
}
