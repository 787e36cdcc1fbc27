//! Shared store: the network-reachable source of truth and its pub/sub bus.
//!
//! Every mutation that other instances must learn about is paired with a
//! channel publish inside one server-side atomic unit, so no peer can observe
//! the new value without the invalidation also being on its way.

pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::RedisConfig;
use crate::error::Result;

pub use self::memory::MemorySharedStore;
pub use self::redis_store::RedisSharedStore;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Stream of messages for a subscription. Ends when the subscription is lost.
pub type MessageStream = BoxStream<'static, SharedMessage>;

/// Operations the multi-level cache needs from the shared store.
///
/// All keys passed in are already localized (`"{cache}:{key}"`).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a single key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read many keys in one round trip; the result is positional.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Atomically set `key` and publish `message` on `channel`.
    async fn set_and_publish(
        &self,
        key: &str,
        value: &[u8],
        channel: &str,
        message: &[u8],
    ) -> Result<()>;

    /// Atomically set every entry and publish every message on `channel`.
    async fn set_many_and_publish(
        &self,
        entries: &[(String, Vec<u8>)],
        channel: &str,
        messages: &[Vec<u8>],
    ) -> Result<()>;

    /// Atomically delete `key` and publish `message` on `channel`.
    async fn delete_and_publish(&self, key: &str, channel: &str, message: &[u8]) -> Result<()>;

    /// Atomically delete every key starting with `prefix` and publish
    /// `message` on `channel`. Returns the number of deleted keys.
    async fn delete_prefix_and_publish(
        &self,
        prefix: &str,
        channel: &str,
        message: &[u8],
    ) -> Result<u64>;

    /// Subscribe to `channels`. Returns once the subscription is active.
    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream>;
}

/// Create the shared store described by `config`.
///
/// - **Redis disabled**: an in-process [`MemorySharedStore`] (single instance)
/// - **Redis enabled**: a pooled [`RedisSharedStore`]; a failed connection is
///   returned as an error rather than silently degrading to local-only mode
pub async fn create_shared_store(config: &RedisConfig) -> Result<Arc<dyn SharedStore>> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process shared store");
        return Ok(Arc::new(MemorySharedStore::new()));
    }

    tracing::info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");
    let store = RedisSharedStore::connect(
        &config.url,
        config.pool_size,
        Duration::from_millis(config.timeout_ms),
    )
    .await?;
    tracing::info!("Connected to Redis");
    Ok(Arc::new(store))
}
