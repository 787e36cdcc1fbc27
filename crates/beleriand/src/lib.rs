//! Beleriand: a two-level cache for fleets of service instances.
//!
//! Each process keeps decoded-ready payloads in a local store in front of a
//! shared store (Redis). Writes go to the shared store together with an
//! invalidation published on the cache's channel; every other instance marks
//! the key's hash slot as invalidated and refetches affected entries on their
//! next read.
//!
//! ```no_run
//! use beleriand::{BeleriandConfig, Cache, CacheManager, CachingConfiguration};
//!
//! # async fn demo() -> beleriand::Result<()> {
//! let manager = CacheManager::connect(&BeleriandConfig::default(), CachingConfiguration::new()).await?;
//! let config = manager.get_cache("Config").await?;
//! let value: Option<String> = config
//!     .get("1", |key| async move { Some(format!("loaded {key}")) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod flight;
mod listener;
pub mod local;
pub mod message;
pub mod metrics;
pub mod multilevel;
pub mod observability;
pub mod registry;
pub mod shared;
pub mod slot;

pub use blocking::BlockingCache;
pub use cache::{Cache, CacheStore};
pub use codec::Payload;
pub use config::{BeleriandConfig, CacheSettings, LocalStoreKind, RedisConfig, loader::load_config};
pub use error::{CacheError, Result};
pub use local::{DashMapLocalStore, LocalStore, MokaLocalStore};
pub use multilevel::{CacheStats, Channels, MultiLevelCache};
pub use registry::{CacheConfigurator, CacheManager, CachingConfiguration};
pub use shared::{MemorySharedStore, RedisSharedStore, SharedStore, create_shared_store};
