//! Synchronous surface over [`MultiLevelCache`].
//!
//! Each call drives the async operation to completion on a runtime handle and
//! blocks the calling thread meanwhile, including while another caller holds
//! the key lock. Calling from inside an async task panics (Tokio refuses to
//! block a runtime worker); use the async API there.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::cache::{Cache, CacheStore};
use crate::error::Result;
use crate::multilevel::{CacheStats, MultiLevelCache};

#[derive(Clone)]
pub struct BlockingCache {
    cache: Arc<MultiLevelCache>,
    runtime: Handle,
}

impl BlockingCache {
    /// Wrap `cache`, running its operations on `runtime`.
    pub fn new(cache: Arc<MultiLevelCache>, runtime: Handle) -> Self {
        Self { cache, runtime }
    }

    pub fn inner(&self) -> &Arc<MultiLevelCache> {
        &self.cache
    }

    pub fn name(&self) -> &str {
        self.cache.name()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn get_or_default<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.runtime.block_on(self.cache.get_or_default(key))
    }

    pub fn get_many_or_default<T>(&self, keys: &[String]) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned + Send,
    {
        self.runtime.block_on(self.cache.get_many_or_default(keys))
    }

    pub fn get<T, F>(&self, key: &str, factory: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(String) -> Option<T> + Send,
    {
        self.runtime
            .block_on(self.cache.get(key, |key| async move { factory(key) }))
    }

    pub fn get_many<T, F>(&self, keys: &[String], factory: F) -> Result<Option<HashMap<String, T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(Vec<String>) -> HashMap<String, T> + Send,
    {
        self.runtime
            .block_on(self.cache.get_many(keys, |keys| async move { factory(keys) }))
    }

    pub fn set<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.runtime.block_on(self.cache.set(key, value))
    }

    pub fn set_many<T>(&self, values: &HashMap<String, T>) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.runtime.block_on(self.cache.set_many(values))
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.runtime.block_on(self.cache.remove(key))
    }

    pub fn clear(&self) -> Result<()> {
        self.runtime.block_on(self.cache.clear())
    }
}
