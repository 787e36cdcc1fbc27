//! Cache registry: one [`MultiLevelCache`] per name, created on first use.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::config::{BeleriandConfig, CacheSettings};
use crate::error::Result;
use crate::multilevel::MultiLevelCache;
use crate::shared::{self, SharedStore};

type InitAction = Arc<dyn Fn(&MultiLevelCache) + Send + Sync>;

/// Callback applied once to a cache when it is created.
#[derive(Clone)]
pub struct CacheConfigurator {
    cache_name: Option<String>,
    init_action: InitAction,
}

impl CacheConfigurator {
    /// Name of the targeted cache; `None` targets every cache.
    pub fn cache_name(&self) -> Option<&str> {
        self.cache_name.as_deref()
    }

    fn applies_to(&self, name: &str) -> bool {
        self.cache_name.as_deref().is_none_or(|target| target == name)
    }
}

impl fmt::Debug for CacheConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfigurator")
            .field("cache_name", &self.cache_name)
            .finish_non_exhaustive()
    }
}

/// Ordered list of configurators, registered before any cache is created.
#[derive(Clone, Debug, Default)]
pub struct CachingConfiguration {
    configurators: Vec<CacheConfigurator>,
}

impl CachingConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `init_action` on every cache when it is created.
    pub fn configure_all<F>(&mut self, init_action: F) -> &mut Self
    where
        F: Fn(&MultiLevelCache) + Send + Sync + 'static,
    {
        self.configurators.push(CacheConfigurator {
            cache_name: None,
            init_action: Arc::new(init_action),
        });
        self
    }

    /// Run `init_action` on the cache named `cache_name` when it is created.
    pub fn configure<F>(&mut self, cache_name: impl Into<String>, init_action: F) -> &mut Self
    where
        F: Fn(&MultiLevelCache) + Send + Sync + 'static,
    {
        self.configurators.push(CacheConfigurator {
            cache_name: Some(cache_name.into()),
            init_action: Arc::new(init_action),
        });
        self
    }

    pub fn configurators(&self) -> &[CacheConfigurator] {
        &self.configurators
    }
}

/// Creates and memoizes named caches over one shared store.
///
/// Concurrent first calls for the same name create exactly one cache and run
/// its configurators exactly once; the other callers wait for it.
pub struct CacheManager {
    configuration: CachingConfiguration,
    settings: CacheSettings,
    shared: Arc<dyn SharedStore>,
    caches: DashMap<String, Arc<OnceCell<Arc<MultiLevelCache>>>>,
}

impl CacheManager {
    pub fn new(
        configuration: CachingConfiguration,
        settings: CacheSettings,
        shared: Arc<dyn SharedStore>,
    ) -> Self {
        Self {
            configuration,
            settings,
            shared,
            caches: DashMap::new(),
        }
    }

    /// Connect the shared store described by `config` and build a manager on it.
    pub async fn connect(
        config: &BeleriandConfig,
        configuration: CachingConfiguration,
    ) -> Result<Self> {
        let shared = shared::create_shared_store(&config.redis).await?;
        Ok(Self::new(configuration, config.cache.clone(), shared))
    }

    /// The cache named `name`, created on first request.
    ///
    /// If creation fails the error is returned and the next call tries again.
    pub async fn get_cache(&self, name: &str) -> Result<Arc<MultiLevelCache>> {
        let cell = Arc::clone(self.caches.entry(name.to_string()).or_default().value());
        let created = cell
            .get_or_try_init(|| self.create_cache(name))
            .await
            .map(Arc::clone);
        if created.is_err() {
            drop(cell);
            // Forget the empty cell unless another caller is still using it
            self.caches
                .remove_if(name, |_, cell| !cell.initialized() && Arc::strong_count(cell) == 1);
        }
        created
    }

    /// Snapshot of every cache created so far.
    pub fn get_all_caches(&self) -> Vec<Arc<MultiLevelCache>> {
        self.caches
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Shut down and forget every created cache.
    pub async fn shutdown(&self) {
        let caches = self.get_all_caches();
        self.caches.clear();
        for cache in caches {
            cache.shutdown().await;
        }
    }

    async fn create_cache(&self, name: &str) -> Result<Arc<MultiLevelCache>> {
        let cache = MultiLevelCache::new(
            name,
            Arc::clone(&self.shared),
            self.settings.create_local_store(),
            &self.settings,
        )
        .await?;

        let mut applied = 0usize;
        for configurator in self
            .configuration
            .configurators()
            .iter()
            .filter(|c| c.applies_to(name))
        {
            (configurator.init_action)(&cache);
            applied += 1;
        }
        tracing::debug!(cache = %name, configurators = applied, "cache configured");

        Ok(Arc::new(cache))
    }
}
