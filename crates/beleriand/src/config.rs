use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::local::{DashMapLocalStore, LocalStore, MokaLocalStore};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeleriandConfig {
    /// Redis (shared store) configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache behaviour shared by every named cache
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BeleriandConfig {
    pub fn validate(&self) -> Result<()> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(CacheError::configuration(
                "redis.enabled=true requires redis.url",
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        if self.redis.timeout_ms == 0 {
            return Err(CacheError::configuration("redis.timeout_ms must be > 0"));
        }
        if self.cache.channel_prefix.trim().is_empty() {
            return Err(CacheError::configuration(
                "cache.channel_prefix must not be empty",
            ));
        }
        if self.cache.local_store == LocalStoreKind::Moka && self.cache.local_max_entries == 0 {
            return Err(CacheError::configuration(
                "cache.local_max_entries must be > 0 for the moka local store",
            ));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(CacheError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// Redis configuration for the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis as the shared store. When disabled, caches share an
    /// in-process store and only stay consistent within one process.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalStoreKind {
    /// Unbounded concurrent map
    #[default]
    Dashmap,
    /// Bounded cache, evicts once `local_max_entries` is reached
    Moka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Prefix of the pub/sub channel names.
    /// Channels are `{prefix}:sync:{cache}` and `{prefix}:clear:{cache}`.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    #[serde(default)]
    pub local_store: LocalStoreKind,

    /// Max entries per cache for the moka local store
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,
}

fn default_channel_prefix() -> String {
    "beleriand".to_string()
}

fn default_local_max_entries() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            local_store: LocalStoreKind::default(),
            local_max_entries: default_local_max_entries(),
        }
    }
}

impl CacheSettings {
    /// Build a fresh local store of the configured kind.
    pub fn create_local_store(&self) -> Arc<dyn LocalStore> {
        match self.local_store {
            LocalStoreKind::Dashmap => Arc::new(DashMapLocalStore::new()),
            LocalStoreKind::Moka => Arc::new(MokaLocalStore::new(self.local_max_entries)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::BeleriandConfig;
    use crate::error::{CacheError, Result};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Load configuration from `path` (or `beleriand.toml` if present) with
    /// environment overrides, e.g. `BELERIAND__REDIS__URL=redis://cache:6379`.
    pub fn load_config(path: Option<&str>) -> Result<BeleriandConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(CacheError::configuration(format!(
                        "config file not found: {p}"
                    )));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from("beleriand.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("BELERIAND")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: BeleriandConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BeleriandConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.redis.enabled);
        assert_eq!(config.cache.channel_prefix, "beleriand");
        assert_eq!(config.cache.local_store, LocalStoreKind::Dashmap);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BeleriandConfig::default();
        config.redis.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = BeleriandConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = BeleriandConfig::default();
        config.cache.local_store = LocalStoreKind::Moka;
        config.cache.local_max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
enabled = true
url = "redis://cache.internal:6380"

[cache]
channel_prefix = "app"
local_store = "moka"
local_max_entries = 500
"#
        )
        .unwrap();

        let config = loader::load_config(file.path().to_str()).unwrap();
        assert!(config.redis.enabled);
        assert_eq!(config.redis.url, "redis://cache.internal:6380");
        assert_eq!(config.redis.pool_size, 10);
        assert_eq!(config.cache.channel_prefix, "app");
        assert_eq!(config.cache.local_store, LocalStoreKind::Moka);
        assert_eq!(config.cache.local_max_entries, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = loader::load_config(Some("/nonexistent/beleriand.toml")).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
