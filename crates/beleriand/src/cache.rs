//! Cache skeleton: the typed get-or-populate protocol on top of byte-level
//! primitives.
//!
//! A concrete cache implements [`CacheStore`] (read, write, remove, clear over
//! encoded payloads) and hands out its [`KeyLocks`]; [`Cache`] then provides
//! the typed API, including stampede protection:
//!
//! ```text
//! get(key, factory)
//!   read ──hit──────────────────────────────────────────▶ value
//!    │miss
//!   lock(key) ─▶ read again ──hit───────────────────────▶ value
//!                  │miss
//!                factory(key) ──None──────────────────────▶ None (nothing stored)
//!                  │Some(v)
//!                set(key, v) ─▶ unlock ──────────────────▶ v
//! ```
//!
//! Callers missing the same key on the same cache instance run the factory at
//! most once per miss; the rest find the value on their second read.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{self, Payload};
use crate::error::Result;
use crate::flight::KeyLocks;

/// Byte-level primitives a concrete cache supplies.
///
/// Keys are raw (not yet prefixed with the cache name); implementations
/// localize them before touching any store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Logical cache name; the key namespace in every store.
    fn name(&self) -> &str;

    async fn get_payload(&self, key: &str) -> Result<Option<Payload>>;

    /// Resolve as many `keys` as possible. Unresolved keys are omitted.
    async fn get_payloads(&self, keys: &[String]) -> Result<HashMap<String, Payload>>;

    async fn set_payload(&self, key: &str, payload: Payload) -> Result<()>;

    async fn set_payloads(&self, payloads: Vec<(String, Payload)>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Typed cache API built on [`CacheStore`].
pub trait Cache: CacheStore {
    /// Locks used to coalesce misses.
    fn key_locks(&self) -> &KeyLocks;

    /// Cached value for `key`, or `None`.
    fn get_or_default<T>(&self, key: &str) -> impl Future<Output = Result<Option<T>>> + Send
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        async move {
            match self.get_payload(key).await? {
                Some(payload) => codec::decode(&payload).map(Some),
                None => Ok(None),
            }
        }
    }

    /// Cached values for whichever of `keys` resolve. Missing keys are omitted.
    fn get_many_or_default<T>(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<HashMap<String, T>>> + Send
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        async move {
            let payloads = self.get_payloads(keys).await?;
            let mut values = HashMap::with_capacity(payloads.len());
            for (key, payload) in payloads {
                values.insert(key, codec::decode(&payload)?);
            }
            Ok(values)
        }
    }

    /// Cached value for `key`, computing and storing it with `factory` on a
    /// miss. A factory returning `None` caches nothing.
    fn get<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
    ) -> impl Future<Output = Result<Option<T>>> + Send
    where
        Self: Sized,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(String) -> Fut + Send,
        Fut: Future<Output = Option<T>> + Send,
    {
        async move {
            if let Some(value) = self.get_or_default::<T>(key).await? {
                return Ok(Some(value));
            }

            let _guard = self.key_locks().lock(key).await;

            if let Some(value) = self.get_or_default::<T>(key).await? {
                return Ok(Some(value));
            }

            let Some(value) = factory(key.to_string()).await else {
                tracing::debug!(cache = %self.name(), key = %key, "factory produced no value");
                return Ok(None);
            };
            self.set(key, &value).await?;
            Ok(Some(value))
        }
    }

    /// Cached values for all of `keys`, computing the missing ones with one
    /// `factory` call.
    ///
    /// All or nothing: returns `None` unless every requested key resolved,
    /// either from the cache or from the factory. Whatever the factory did
    /// produce is stored even when the result is `None`.
    fn get_many<T, F, Fut>(
        &self,
        keys: &[String],
        factory: F,
    ) -> impl Future<Output = Result<Option<HashMap<String, T>>>> + Send
    where
        Self: Sized,
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(Vec<String>) -> Fut + Send,
        Fut: Future<Output = HashMap<String, T>> + Send,
    {
        async move {
            let found = self.get_many_or_default::<T>(keys).await?;
            let missing = missing_keys(keys, &found);
            if missing.is_empty() {
                return Ok(Some(found));
            }

            let _guards = self.key_locks().lock_many(&missing).await;

            let mut found = self.get_many_or_default::<T>(keys).await?;
            let missing = missing_keys(keys, &found);
            if !missing.is_empty() {
                let wanted: HashSet<&String> = missing.iter().collect();
                let produced: HashMap<String, T> = factory(missing.clone())
                    .await
                    .into_iter()
                    .filter(|(key, _)| wanted.contains(key))
                    .collect();
                if !produced.is_empty() {
                    self.set_many(&produced).await?;
                }
                found.extend(produced);
            }

            if !missing_keys(keys, &found).is_empty() {
                tracing::debug!(
                    cache = %self.name(),
                    requested = keys.len(),
                    resolved = found.len(),
                    "batch could not be fully resolved"
                );
                return Ok(None);
            }
            Ok(Some(found))
        }
    }

    /// Store `value` under `key`.
    fn set<T>(&self, key: &str, value: &T) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
        T: Serialize + Sync,
    {
        async move {
            let payload = codec::encode(key, value)?;
            self.set_payload(key, payload).await
        }
    }

    /// Store every entry of `values`.
    fn set_many<T>(&self, values: &HashMap<String, T>) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
        T: Serialize + Sync,
    {
        async move {
            let mut payloads = Vec::with_capacity(values.len());
            for (key, value) in values {
                payloads.push((key.clone(), codec::encode(key, value)?));
            }
            self.set_payloads(payloads).await
        }
    }
}

/// Distinct requested keys absent from `found`, in request order.
fn missing_keys<T>(keys: &[String], found: &HashMap<String, T>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| !found.contains_key(*key) && seen.insert(*key))
        .cloned()
        .collect()
}
