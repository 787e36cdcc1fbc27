//! In-process shared store.
//!
//! Every cache handed the same `MemorySharedStore` behaves like a separate
//! instance talking to one Redis: writes and their publishes happen under one
//! lock, and subscribers receive messages through a broadcast bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{MessageStream, SharedMessage, SharedStore};
use crate::error::Result;

const BUS_CAPACITY: usize = 4096;

pub struct MemorySharedStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    bus: broadcast::Sender<SharedMessage>,
    reads: AtomicU64,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            data: Mutex::new(HashMap::new()),
            bus,
            reads: AtomicU64::new(0),
        }
    }

    /// Number of read round trips (`get` and `get_many`) served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Snapshot of stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Raw stored bytes for `key`, without counting as a read.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().get(key).cloned()
    }

    fn publish(&self, channel: &str, message: &[u8]) {
        // No subscribers is not an error
        let _ = self.bus.send(SharedMessage {
            channel: channel.to_string(),
            payload: message.to_vec(),
        });
    }
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.lock().get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let data = self.data.lock();
        Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
    }

    async fn set_and_publish(
        &self,
        key: &str,
        value: &[u8],
        channel: &str,
        message: &[u8],
    ) -> Result<()> {
        let mut data = self.data.lock();
        data.insert(key.to_string(), value.to_vec());
        self.publish(channel, message);
        Ok(())
    }

    async fn set_many_and_publish(
        &self,
        entries: &[(String, Vec<u8>)],
        channel: &str,
        messages: &[Vec<u8>],
    ) -> Result<()> {
        let mut data = self.data.lock();
        for (key, value) in entries {
            data.insert(key.clone(), value.clone());
        }
        for message in messages {
            self.publish(channel, message);
        }
        Ok(())
    }

    async fn delete_and_publish(&self, key: &str, channel: &str, message: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        data.remove(key);
        self.publish(channel, message);
        Ok(())
    }

    async fn delete_prefix_and_publish(
        &self,
        prefix: &str,
        channel: &str,
        message: &[u8],
    ) -> Result<u64> {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(prefix));
        let deleted = (before - data.len()) as u64;
        self.publish(channel, message);
        Ok(deleted)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream> {
        let channels: Arc<HashSet<String>> = Arc::new(channels.iter().cloned().collect());
        let receiver = self.bus.subscribe();

        let messages = stream::unfold(receiver, move |mut receiver| {
            let channels = Arc::clone(&channels);
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if channels.contains(&message.channel) => {
                            return Some((message, receiver));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            // Missed messages cannot be replayed; end the
                            // stream so the listener resubscribes and resets
                            tracing::warn!(skipped, "in-process subscriber lagged");
                            return None;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(messages.boxed())
    }
}
