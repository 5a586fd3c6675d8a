//! Compute-once cache coordinator for blocking callers.
//!
//! Sits in front of a [`CacheStore`] and guarantees that concurrent
//! `get_or_add` calls for a missing `(key, region)` run their producer once.
//! Each read-compute-write cycle runs under a key lock named by
//! `LockHash(key, region, depth)`; the depth component lets a producer call
//! back into the cache for its own key without deadlocking on the lock its
//! caller holds.

use std::any::{Any, type_name};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::debug;

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{Dependencies, LockHash, dependency_count};
use super::lock::mutex_lock;
use super::reentrancy;
use super::registry::KeyLockRegistry;
use super::store::{CacheStore, store_from_config};
use super::value::CachedValue;

const SOURCE: &str = "cache::coordinator";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "keylock_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "keylock_cache_miss_total";
pub(crate) const METRIC_CACHE_PRODUCE_TOTAL: &str = "keylock_cache_produce_total";
pub(crate) const METRIC_CACHE_LOCK_WAIT_MS: &str = "keylock_cache_lock_wait_ms";

/// Compute-once coordinator over an arbitrary [`CacheStore`].
///
/// The key lock registry is owned explicitly: coordinators built with
/// [`CacheCoordinator::new`] get a private one, while
/// [`CacheCoordinator::with_registry`] lets several coordinators over the
/// same store share it.
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    locks: Arc<KeyLockRegistry>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_registry(store, Arc::new(KeyLockRegistry::new()))
    }

    pub fn with_registry(store: Arc<dyn CacheStore>, locks: Arc<KeyLockRegistry>) -> Self {
        Self { store, locks }
    }

    /// Build a coordinator over the store `config` describes.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(store_from_config(config))
    }

    pub fn backing_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn lock_registry(&self) -> &Arc<KeyLockRegistry> {
        &self.locks
    }

    /// Lock-free read.
    ///
    /// Returns `Ok(None)` when absent and `TypeMismatch` when a value exists
    /// under another type.
    pub fn try_get<T>(&self, key: &str, region: &str) -> Result<Option<T>, CacheError>
    where
        T: Clone + Send + Sync + 'static,
    {
        read_typed(self.store.as_ref(), key, region)
    }

    /// Store `value` unless the key already holds one.
    ///
    /// An existing value is left untouched, but must still have type `T`.
    pub fn store<T>(
        &self,
        key: &str,
        region: &str,
        value: T,
        dependencies: Option<&Dependencies>,
    ) -> Result<(), CacheError>
    where
        T: Send + Sync + 'static,
    {
        let handle = self
            .locks
            .acquire_or_create(LockHash::new(key, region, reentrancy::depth()));
        let _guard = mutex_lock(handle.lock(), SOURCE, "store");

        if let Some(existing) = self.store.get(key, region) {
            ensure_type::<T>(&existing, key, region)?;
            debug!(region, key, "Cache store skipped; value already present");
            return Ok(());
        }

        self.store.set(key, CachedValue::new(value), region);
        debug!(
            region,
            key,
            dependencies = dependency_count(dependencies),
            "Cache entry stored"
        );
        Ok(())
    }

    /// Return the cached value, or run `producer` once to create it.
    ///
    /// Concurrent callers for the same missing key block on its key lock and
    /// receive the value stored by whichever caller produced it. A producer
    /// returning `Ok(None)` stores nothing and the call yields `Ok(None)`. A
    /// producer error is returned as-is once the key lock is released; the
    /// next caller starts over with a fresh attempt.
    pub fn get_or_add<T, E, F>(
        &self,
        key: &str,
        region: &str,
        producer: F,
        dependencies: Option<&Dependencies>,
    ) -> Result<Option<T>, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        if let Some(value) = self.try_get::<T>(key, region)? {
            record_hit(region, "fast");
            return Ok(Some(value));
        }
        counter!(METRIC_CACHE_MISS_TOTAL, "region" => region.to_string()).increment(1);

        let hash = LockHash::new(key, region, reentrancy::depth());
        debug!(region, key, lock_hash = %hash, "Cache miss; acquiring key lock");

        let handle = self.locks.acquire_or_create(hash);
        let wait_started = Instant::now();
        let _guard = mutex_lock(handle.lock(), SOURCE, "get_or_add");
        histogram!(METRIC_CACHE_LOCK_WAIT_MS).record(wait_started.elapsed().as_secs_f64() * 1000.0);

        // Another caller may have produced the value while we waited.
        if let Some(value) = self.try_get::<T>(key, region)? {
            record_hit(region, "locked");
            return Ok(Some(value));
        }

        let produced = {
            let _depth = reentrancy::enter();
            producer()
        };

        match produced {
            Ok(Some(value)) => {
                // A nested producer or `store` may have filled the key meanwhile.
                if self.store.get(key, region).is_none() {
                    self.store.set(key, CachedValue::new(value.clone()), region);
                }
                record_produce(region, "stored");
                debug!(
                    region,
                    key,
                    dependencies = dependency_count(dependencies),
                    "Cache value produced and stored"
                );
                Ok(Some(value))
            }
            Ok(None) => {
                record_produce(region, "empty");
                debug!(region, key, "Cache producer returned nothing; not cached");
                Ok(None)
            }
            Err(err) => {
                record_produce(region, "error");
                debug!(region, key, "Cache producer failed; releasing key lock");
                Err(err)
            }
        }
    }
}

pub(crate) fn read_typed<T>(
    store: &dyn CacheStore,
    key: &str,
    region: &str,
) -> Result<Option<T>, CacheError>
where
    T: Clone + Send + Sync + 'static,
{
    let Some(cached) = store.get(key, region) else {
        return Ok(None);
    };
    match cached.downcast_ref::<T>() {
        Some(value) => Ok(Some(value.clone())),
        None => Err(CacheError::type_mismatch(
            key,
            region,
            type_name::<T>(),
            cached.type_name(),
        )),
    }
}

pub(crate) fn ensure_type<T: Any>(
    cached: &CachedValue,
    key: &str,
    region: &str,
) -> Result<(), CacheError> {
    if cached.is::<T>() {
        Ok(())
    } else {
        Err(CacheError::type_mismatch(
            key,
            region,
            type_name::<T>(),
            cached.type_name(),
        ))
    }
}

pub(crate) fn record_hit(region: &str, path: &'static str) {
    debug!(region, path, "Cache hit");
    counter!(METRIC_CACHE_HIT_TOTAL, "region" => region.to_string(), "path" => path).increment(1);
}

pub(crate) fn record_produce(region: &str, outcome: &'static str) {
    counter!(
        METRIC_CACHE_PRODUCE_TOTAL,
        "region" => region.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
