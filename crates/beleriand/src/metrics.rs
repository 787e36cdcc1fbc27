//! Cache metrics through the `metrics` facade.
//!
//! No recorder is installed here; the embedding application decides where
//! metrics go (Prometheus exporter, statsd, nothing).

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "beleriand_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "beleriand_cache_misses_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "beleriand_cache_invalidations_total";
    pub const CACHE_LOCAL_ENTRIES: &str = "beleriand_cache_local_entries";
}

/// Record a cache hit on `tier` ("local" or "shared").
pub fn record_cache_hit(cache: &str, tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache.to_string(), "tier" => tier).increment(1);
}

/// Record a miss on both levels.
pub fn record_cache_miss(cache: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache.to_string()).increment(1);
}

/// Record an applied invalidation of `kind` ("slot", "all" or "clear").
pub fn record_invalidation(cache: &str, kind: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "cache" => cache.to_string(), "kind" => kind)
        .increment(1);
}

/// Set the number of local entries of a cache.
pub fn set_local_entries(cache: &str, count: usize) {
    gauge!(names::CACHE_LOCAL_ENTRIES, "cache" => cache.to_string()).set(count as f64);
}
