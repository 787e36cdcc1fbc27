//! A read whose shared-store reply arrives after a write, remove or clear on
//! the same instance must not leave the older value in the local store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use beleriand::codec;
use beleriand::shared::MessageStream;
use beleriand::{
    Cache, CacheSettings, CacheStore, DashMapLocalStore, MemorySharedStore, MokaLocalStore,
    MultiLevelCache, Result, SharedStore,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

struct Gate {
    fetched: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-process store whose next read can be held after it has fetched.
#[derive(Default)]
struct GatedStore {
    inner: MemorySharedStore,
    gate: Mutex<Option<Gate>>,
}

impl GatedStore {
    /// Hold the reply of the next `get`/`get_many`. The first receiver fires
    /// once the value has been read; sending on the returned sender lets the
    /// reply through.
    fn hold_next_read(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (fetched_tx, fetched_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock() = Some(Gate {
            fetched: fetched_tx,
            release: release_rx,
        });
        (fetched_rx, release_tx)
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.fetched.send(());
            let _ = gate.release.await;
        }
    }

    async fn seed(&self, key: &str, value: u32) {
        let raw = key.split_once(':').map(|(_, raw)| raw).unwrap_or(key);
        let payload = codec::encode(raw, &value).expect("encode");
        self.inner
            .set_and_publish(key, payload.as_slice(), "seed", b"")
            .await
            .expect("seed");
    }
}

#[async_trait]
impl SharedStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.inner.get(key).await?;
        self.pass_gate().await;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let values = self.inner.get_many(keys).await?;
        self.pass_gate().await;
        Ok(values)
    }

    async fn set_and_publish(
        &self,
        key: &str,
        value: &[u8],
        channel: &str,
        message: &[u8],
    ) -> Result<()> {
        self.inner.set_and_publish(key, value, channel, message).await
    }

    async fn set_many_and_publish(
        &self,
        entries: &[(String, Vec<u8>)],
        channel: &str,
        messages: &[Vec<u8>],
    ) -> Result<()> {
        self.inner
            .set_many_and_publish(entries, channel, messages)
            .await
    }

    async fn delete_and_publish(&self, key: &str, channel: &str, message: &[u8]) -> Result<()> {
        self.inner.delete_and_publish(key, channel, message).await
    }

    async fn delete_prefix_and_publish(
        &self,
        prefix: &str,
        channel: &str,
        message: &[u8],
    ) -> Result<u64> {
        self.inner
            .delete_prefix_and_publish(prefix, channel, message)
            .await
    }

    async fn subscribe(&self, channels: &[String]) -> Result<MessageStream> {
        self.inner.subscribe(channels).await
    }
}

async fn cache_on(store: &Arc<GatedStore>) -> Arc<MultiLevelCache> {
    let cache = MultiLevelCache::new(
        "Config",
        store.clone(),
        Arc::new(DashMapLocalStore::new()),
        &CacheSettings::default(),
    )
    .await
    .expect("cache");
    Arc::new(cache)
}

/// Start a read of "k" and return once its fetch has happened but before
/// its reply is delivered.
async fn start_held_read(
    store: &Arc<GatedStore>,
    cache: &Arc<MultiLevelCache>,
) -> (
    tokio::task::JoinHandle<Result<Option<u32>>>,
    oneshot::Sender<()>,
) {
    let (fetched, release) = store.hold_next_read();
    let reader = tokio::spawn({
        let cache = Arc::clone(cache);
        async move { cache.get_or_default::<u32>("k").await }
    });
    fetched.await.expect("read reached the shared store");
    (reader, release)
}

#[tokio::test]
async fn test_late_read_does_not_overwrite_newer_write() {
    let store = Arc::new(GatedStore::default());
    store.seed("Config:k", 1).await;
    let cache = cache_on(&store).await;

    let (reader, release) = start_held_read(&store, &cache).await;
    cache.set("k", &2u32).await.expect("set");
    release.send(()).expect("release");

    // The read was linearized before the write
    assert_eq!(reader.await.expect("join").expect("get"), Some(1));
    for _ in 0..3 {
        assert_eq!(cache.get_or_default::<u32>("k").await.expect("get"), Some(2));
    }
}

#[tokio::test]
async fn test_late_read_does_not_resurrect_cleared_value() {
    let store = Arc::new(GatedStore::default());
    store.seed("Config:k", 1).await;
    let cache = cache_on(&store).await;

    let (reader, release) = start_held_read(&store, &cache).await;
    cache.clear().await.expect("clear");
    release.send(()).expect("release");

    assert_eq!(reader.await.expect("join").expect("get"), Some(1));
    for _ in 0..3 {
        assert_eq!(cache.get_or_default::<u32>("k").await.expect("get"), None);
    }
    assert!(store.inner.keys().is_empty());
}

#[tokio::test]
async fn test_late_read_does_not_resurrect_removed_value() {
    let store = Arc::new(GatedStore::default());
    store.seed("Config:k", 1).await;
    let cache = cache_on(&store).await;

    let (reader, release) = start_held_read(&store, &cache).await;
    cache.remove("k").await.expect("remove");
    release.send(()).expect("release");

    assert_eq!(reader.await.expect("join").expect("get"), Some(1));
    for _ in 0..3 {
        assert_eq!(cache.get_or_default::<u32>("k").await.expect("get"), None);
    }
}

#[tokio::test]
async fn test_late_batch_read_does_not_overwrite_newer_write() {
    let store = Arc::new(GatedStore::default());
    store.seed("Config:k", 1).await;
    let cache = MultiLevelCache::new(
        "Config",
        store.clone(),
        Arc::new(MokaLocalStore::new(100)),
        &CacheSettings::default(),
    )
    .await
    .map(Arc::new)
    .expect("cache");

    let (fetched, release) = store.hold_next_read();
    let reader = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move {
            cache
                .get_many_or_default::<u32>(&["k".to_string()])
                .await
        }
    });
    fetched.await.expect("read reached the shared store");
    cache.set("k", &2u32).await.expect("set");
    release.send(()).expect("release");

    let batch: HashMap<String, u32> = reader.await.expect("join").expect("get_many");
    assert_eq!(batch.get("k"), Some(&1));
    for _ in 0..3 {
        assert_eq!(cache.get_or_default::<u32>("k").await.expect("get"), Some(2));
    }
}
