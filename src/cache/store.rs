//! Underlying cache stores.
//!
//! `CacheStore` is the contract the coordinators build on: plain `get`/`set`
//! keyed by key and region, safe for concurrent calls, with no compute-once
//! guarantee. `MemoryStore` keeps one LRU per region; `NullStore` keeps
//! nothing and backs a disabled cache.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::lock::mutex_lock;
use super::value::CachedValue;

const SOURCE: &str = "cache::store";
const METRIC_STORE_EVICT_TOTAL: &str = "keylock_store_evict_total";

/// Key/region store consulted by the cache coordinators.
///
/// Individual calls must be thread-safe. A `set` following a `get` is not
/// expected to be atomic; the coordinators provide that.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str, region: &str) -> Option<CachedValue>;

    fn set(&self, key: &str, value: CachedValue, region: &str);
}

impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    fn get(&self, key: &str, region: &str) -> Option<CachedValue> {
        (**self).get(key, region)
    }

    fn set(&self, key: &str, value: CachedValue, region: &str) {
        (**self).set(key, value, region)
    }
}

/// Pick the store described by `config`.
pub fn store_from_config(config: &CacheConfig) -> Arc<dyn CacheStore> {
    if config.enabled {
        Arc::new(MemoryStore::new(config))
    } else {
        Arc::new(NullStore)
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// In-memory store with one LRU per region.
///
/// Regions are created on first write with the capacity `CacheConfig`
/// assigns them. Eviction is this store's own policy and is invisible to the
/// coordinators beyond a later miss.
pub struct MemoryStore {
    config: CacheConfig,
    regions: DashMap<String, Mutex<LruCache<String, CachedValue>>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            config: config.clone(),
            regions: DashMap::new(),
        }
    }

    /// Remove one entry, returning it if present.
    pub fn invalidate(&self, key: &str, region: &str) -> Option<CachedValue> {
        let entries = self.regions.get(region)?;
        mutex_lock(entries.value(), SOURCE, "invalidate").pop(key)
    }

    pub fn clear_region(&self, region: &str) {
        if let Some(entries) = self.regions.get(region) {
            mutex_lock(entries.value(), SOURCE, "clear_region").clear();
        }
    }

    pub fn clear(&self) {
        self.regions.clear();
    }

    /// Number of entries across all regions.
    pub fn len(&self) -> usize {
        self.regions
            .iter()
            .map(|entries| mutex_lock(entries.value(), SOURCE, "len").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str, region: &str) -> Option<CachedValue> {
        let entries = self.regions.get(region)?;
        mutex_lock(entries.value(), SOURCE, "get").get(key).cloned()
    }

    fn set(&self, key: &str, value: CachedValue, region: &str) {
        let entries = self
            .regions
            .entry(region.to_string())
            .or_insert_with(|| Mutex::new(LruCache::new(self.config.capacity_for(region))))
            .downgrade();
        let displaced = mutex_lock(entries.value(), SOURCE, "set").push(key.to_string(), value);

        // `push` also hands back the previous value when the key was already present.
        if let Some((evicted_key, _)) = displaced.filter(|(displaced_key, _)| displaced_key != key)
        {
            debug!(region, evicted_key = %evicted_key, "Cache store evicted entry at capacity");
            counter!(METRIC_STORE_EVICT_TOTAL, "region" => region.to_string()).increment(1);
        }
    }
}

// ============================================================================
// Null store
// ============================================================================

/// Store that retains nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl CacheStore for NullStore {
    fn get(&self, _key: &str, _region: &str) -> Option<CachedValue> {
        None
    }

    fn set(&self, _key: &str, _value: CachedValue, _region: &str) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn string_at(store: &dyn CacheStore, key: &str, region: &str) -> Option<String> {
        store
            .get(key, region)
            .and_then(|value| value.downcast_ref::<String>().cloned())
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new(&CacheConfig::default());

        assert!(store.get("home", "pages").is_none());

        store.set("home", CachedValue::new("<main/>".to_string()), "pages");

        assert_eq!(string_at(&store, "home", "pages").as_deref(), Some("<main/>"));
        assert!(store.get("home", "navigation").is_none());

        let removed = store.invalidate("home", "pages");
        assert!(removed.is_some());
        assert!(store.get("home", "pages").is_none());
    }

    #[test]
    fn invalidate_reports_absent_entries() {
        let store = MemoryStore::new(&CacheConfig::default());
        assert!(store.invalidate("home", "pages").is_none());

        store.set("home", CachedValue::new(1_u8), "pages");
        assert!(store.invalidate("about", "pages").is_none());
        assert!(store.invalidate("home", "pages").is_some());
        assert!(store.invalidate("home", "pages").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_evicts_per_region() {
        let config = CacheConfig {
            region_capacity: 2,
            region_limits: HashMap::from([("navigation".to_string(), 1)]),
            ..Default::default()
        };
        let store = MemoryStore::new(&config);

        store.set("a", CachedValue::new(1_u32), "pages");
        store.set("b", CachedValue::new(2_u32), "pages");
        store.set("c", CachedValue::new(3_u32), "pages");

        // Oldest page evicted
        assert!(store.get("a", "pages").is_none());
        assert!(store.get("b", "pages").is_some());
        assert!(store.get("c", "pages").is_some());

        store.set("main", CachedValue::new(1_u32), "navigation");
        store.set("footer", CachedValue::new(2_u32), "navigation");
        assert!(store.get("main", "navigation").is_none());
        assert!(store.get("footer", "navigation").is_some());

        assert_eq!(store.len(), 3);
    }

    #[test]
    fn memory_store_clear_region_keeps_other_regions() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("home", CachedValue::new(1_u8), "pages");
        store.set("main", CachedValue::new(2_u8), "navigation");

        store.clear_region("pages");
        assert!(store.get("home", "pages").is_none());
        assert!(store.get("main", "navigation").is_some());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn null_store_retains_nothing() {
        let store = NullStore;
        store.set("home", CachedValue::new(1_u8), "pages");
        assert!(store.get("home", "pages").is_none());
    }

    #[test]
    fn store_from_config_honours_enabled_flag() {
        let enabled = store_from_config(&CacheConfig::default());
        enabled.set("k", CachedValue::new(1_u8), "r");
        assert!(enabled.get("k", "r").is_some());

        let disabled = store_from_config(&CacheConfig {
            enabled: false,
            ..Default::default()
        });
        disabled.set("k", CachedValue::new(1_u8), "r");
        assert!(disabled.get("k", "r").is_none());
    }

    #[test]
    fn memory_store_recovers_from_poisoned_region() {
        let store = MemoryStore::new(&CacheConfig::default());
        store.set("home", CachedValue::new(1_u8), "pages");

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let entries = store.regions.get("pages").expect("pages region");
            let _guard = entries
                .value()
                .lock()
                .expect("region lock should be acquired");
            panic!("poison pages region");
        }));

        assert!(store.get("home", "pages").is_some());
    }
}
