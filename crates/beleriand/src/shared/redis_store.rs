//! Redis-backed shared store.
//!
//! ## Atomicity
//!
//! | Operation | Redis commands |
//! |-----------|----------------|
//! | set       | `MULTI SET PUBLISH EXEC` |
//! | set many  | `MULTI MSET PUBLISH... EXEC` |
//! | delete    | `MULTI DEL PUBLISH EXEC` |
//! | clear     | Lua: `SCAN`/`DEL` over the prefix, then `PUBLISH` |
//!
//! Subscriptions use a dedicated pub/sub connection each; pooled connections
//! can't be put into SUBSCRIBE mode.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use futures_util::StreamExt;
use redis::{AsyncCommands, Script};

use super::{MessageStream, SharedMessage, SharedStore};
use crate::error::{CacheError, Result};

const DELETE_PREFIX_SCRIPT: &str = r"
local cursor = '0'
local deleted = 0
repeat
    local page = redis.call('SCAN', cursor, 'MATCH', KEYS[1], 'COUNT', 1000)
    cursor = page[1]
    for _, key in ipairs(page[2]) do
        deleted = deleted + redis.call('DEL', key)
    end
until cursor == '0'
redis.call('PUBLISH', ARGV[1], ARGV[2])
return deleted
";

pub struct RedisSharedStore {
    pool: Pool,
    client: redis::Client,
    delete_prefix: Script,
}

impl RedisSharedStore {
    /// Build a pool for `url` and verify it with a `PING`.
    pub async fn connect(url: &str, pool_size: usize, timeout: Duration) -> Result<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(pool_size);
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
            redis_config.pool = Some(pool_config);
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Pool(format!("failed to create Redis pool: {e}")))?;
        let client = redis::Client::open(url)?;

        let store = Self::new(pool, client);
        let mut conn = store.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(store)
    }

    /// Wrap an existing pool. `client` must point at the same server; it is
    /// only used to open pub/sub connections.
    pub fn new(pool: Pool, client: redis::Client) -> Self {
        Self {
            pool,
            client,
            delete_prefix: Script::new(DELETE_PREFIX_SCRIPT),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set_and_publish(
        &self,
        key: &str,
        value: &[u8],
        channel: &str,
        message: &[u8],
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(key, value)
            .ignore()
            .publish(channel, message)
            .ignore()
            .query_async(&mut conn)
            .await?;
        tracing::trace!(key = %key, channel = %channel, "SET+PUBLISH");
        Ok(())
    }

    async fn set_many_and_publish(
        &self,
        entries: &[(String, Vec<u8>)],
        channel: &str,
        messages: &[Vec<u8>],
    ) -> Result<()> {
        if entries.is_empty() && messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !entries.is_empty() {
            pipe.mset(entries).ignore();
        }
        for message in messages {
            pipe.publish(channel, message.as_slice()).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        tracing::trace!(keys = entries.len(), messages = messages.len(), "MSET+PUBLISH");
        Ok(())
    }

    async fn delete_and_publish(&self, key: &str, channel: &str, message: &[u8]) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .publish(channel, message)
            .ignore()
            .query_async(&mut conn)
            .await?;
        tracing::trace!(key = %key, channel = %channel, "DEL+PUBLISH");
        Ok(())
    }

    async fn delete_prefix_and_publish(
        &self,
        prefix: &str,
        channel: &str,
        message: &[u8],
    ) -> Result<u64> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let deleted: u64 = self
            .delete_prefix
            .key(&pattern)
            .arg(channel)
            .arg(message)
            .invoke_async(&mut conn)
            .await?;
        tracing::trace!(pattern = %pattern, deleted, "prefix DEL+PUBLISH");
        Ok(deleted)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        tracing::info!(channels = ?channels, "Subscribed to Redis channels");

        let messages = pubsub.into_on_message().map(|msg| SharedMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(messages.boxed())
    }
}

/// Escape glob metacharacters so a cache name is matched literally.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
