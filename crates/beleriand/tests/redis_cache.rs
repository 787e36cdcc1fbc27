//! Multi-level cache against a real Redis.
//!
//! Uses testcontainers to spin up Redis, so these tests need Docker:
//! `cargo test -p beleriand --test redis_cache -- --ignored`

use std::collections::HashMap;
use std::time::Duration;

use beleriand::{
    BeleriandConfig, Cache, CacheManager, CacheStore, CachingConfiguration, RedisConfig, RedisSharedStore,
    SharedStore,
};
use futures_util::StreamExt;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");
            (container, url)
        })
        .await;
    url.clone()
}

async fn manager() -> CacheManager {
    let config = BeleriandConfig {
        redis: RedisConfig {
            enabled: true,
            url: get_redis_url().await,
            pool_size: 4,
            timeout_ms: 5000,
        },
        ..Default::default()
    };
    CacheManager::connect(&config, CachingConfiguration::new())
        .await
        .expect("connect")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_set_publishes_invalidation() {
    let url = get_redis_url().await;
    let store = RedisSharedStore::connect(&url, 2, Duration::from_secs(5))
        .await
        .expect("connect");
    let mut messages = store
        .subscribe(&["test:sync:Pubsub".to_string()])
        .await
        .expect("subscribe");

    store
        .set_and_publish("Pubsub:1", b"v", "test:sync:Pubsub", b"hello")
        .await
        .expect("set");

    let message = tokio::time::timeout(Duration::from_secs(5), messages.next())
        .await
        .expect("message in time")
        .expect("stream open");
    assert_eq!(message.channel, "test:sync:Pubsub");
    assert_eq!(message.payload, b"hello");
    assert_eq!(store.get("Pubsub:1").await.expect("get"), Some(b"v".to_vec()));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_two_instances_stay_consistent() {
    let first = manager().await;
    let second = manager().await;
    let a = first.get_cache("Rates").await.expect("cache");
    let b = second.get_cache("Rates").await.expect("cache");

    a.set("eur", &1.08f64).await.expect("set");
    wait_until(|| b.stats().invalidations_applied >= 1).await;
    assert_eq!(b.get_or_default::<f64>("eur").await.expect("get"), Some(1.08));

    a.set("eur", &1.09f64).await.expect("set");
    wait_until(|| b.stats().invalidations_applied >= 2).await;
    assert_eq!(b.get_or_default::<f64>("eur").await.expect("get"), Some(1.09));

    a.remove("eur").await.expect("remove");
    wait_until(|| b.stats().invalidations_applied >= 3).await;
    assert_eq!(b.get_or_default::<f64>("eur").await.expect("get"), None);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_batch_and_clear() {
    let manager = manager().await;
    let cache = manager.get_cache("Ba*").await.expect("cache");
    let other = manager.get_cache("Bat").await.expect("cache");

    let values: HashMap<String, u32> = (0..50).map(|i| (format!("k{i}"), i)).collect();
    cache.set_many(&values).await.expect("set_many");
    other.set("k0", &7u32).await.expect("set");

    let keys: Vec<String> = values.keys().cloned().collect();
    let read: HashMap<String, u32> = cache.get_many_or_default(&keys).await.expect("get_many");
    assert_eq!(read, values);

    cache.clear().await.expect("clear");
    let read: HashMap<String, u32> = cache.get_many_or_default(&keys).await.expect("get_many");
    assert!(read.is_empty());
    // Glob characters in a cache name don't widen the clear
    assert_eq!(other.get_or_default::<u32>("k0").await.expect("get"), Some(7));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_unreachable_redis_fails() {
    let config = BeleriandConfig {
        redis: RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
            timeout_ms: 500,
        },
        ..Default::default()
    };
    assert!(
        CacheManager::connect(&config, CachingConfiguration::new())
            .await
            .is_err()
    );
}
