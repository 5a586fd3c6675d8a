//! Compute-once cache coordinator for async producers.
//!
//! Same protocol as [`CacheCoordinator`](super::CacheCoordinator), with the
//! key lock being a `tokio::sync::Mutex` so waiters yield instead of parking a
//! runtime worker, and the reentrancy depth scoped to the current task.
//! Producers that hand work to a spawned task run that work at depth zero,
//! exactly like a second thread would.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tracing::debug;

use super::config::CacheConfig;
use super::coordinator::{
    METRIC_CACHE_LOCK_WAIT_MS, METRIC_CACHE_MISS_TOTAL, ensure_type, read_typed, record_hit,
    record_produce,
};
use super::error::CacheError;
use super::keys::{Dependencies, LockHash, dependency_count};
use super::reentrancy;
use super::registry::KeyLockRegistry;
use super::store::{CacheStore, store_from_config};
use super::value::CachedValue;

/// Registry flavour used by [`AsyncCacheCoordinator`].
pub type AsyncKeyLockRegistry = KeyLockRegistry<Mutex<()>>;

pub struct AsyncCacheCoordinator {
    store: Arc<dyn CacheStore>,
    locks: Arc<AsyncKeyLockRegistry>,
}

impl AsyncCacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_registry(store, Arc::new(KeyLockRegistry::new()))
    }

    pub fn with_registry(store: Arc<dyn CacheStore>, locks: Arc<AsyncKeyLockRegistry>) -> Self {
        Self { store, locks }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(store_from_config(config))
    }

    pub fn backing_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn lock_registry(&self) -> &Arc<AsyncKeyLockRegistry> {
        &self.locks
    }

    pub fn try_get<T>(&self, key: &str, region: &str) -> Result<Option<T>, CacheError>
    where
        T: Clone + Send + Sync + 'static,
    {
        read_typed(self.store.as_ref(), key, region)
    }

    pub async fn store<T>(
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
            .acquire_or_create(LockHash::new(key, region, reentrancy::task_depth()));
        let _guard = handle.lock().lock().await;

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

    /// Return the cached value, or await `producer` once to create it.
    ///
    /// Dropping the returned future releases the key lock and leaves the key
    /// absent, so a cancelled producer never blocks later callers.
    pub async fn get_or_add<T, E, F, Fut>(
        &self,
        key: &str,
        region: &str,
        producer: F,
        dependencies: Option<&Dependencies>,
    ) -> Result<Option<T>, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = self.try_get::<T>(key, region)? {
            record_hit(region, "fast");
            return Ok(Some(value));
        }
        counter!(METRIC_CACHE_MISS_TOTAL, "region" => region.to_string()).increment(1);

        let hash = LockHash::new(key, region, reentrancy::task_depth());
        debug!(region, key, lock_hash = %hash, "Cache miss; awaiting key lock");

        let handle = self.locks.acquire_or_create(hash);
        let wait_started = Instant::now();
        let _guard = handle.lock().lock().await;
        histogram!(METRIC_CACHE_LOCK_WAIT_MS).record(wait_started.elapsed().as_secs_f64() * 1000.0);

        if let Some(value) = self.try_get::<T>(key, region)? {
            record_hit(region, "locked");
            return Ok(Some(value));
        }

        match reentrancy::scope_entered(producer()).await {
            Ok(Some(value)) => {
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
