//! Compute-once cache coordination.
//!
//! A coordinator sits in front of a plain key/region [`CacheStore`] and adds
//! what the store lacks:
//!
//! - **Compute-once**: concurrent `get_or_add` calls for the same missing key
//!   run the producer once; everyone else waits on the key lock and reads the
//!   stored result.
//! - **Re-entrancy**: a producer may call back into the cache for the very key
//!   it is producing. Its calls run one reentrancy level deeper and therefore
//!   lock a different `LockHash` than the caller holds.
//!
//! ## Configuration
//!
//! Store behavior is controlled via `keylock.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! region_capacity = 1000
//!
//! [cache.region_limits]
//! navigation = 16
//! ```

mod async_coordinator;
mod config;
mod coordinator;
mod error;
mod keys;
mod lock;
pub mod reentrancy;
mod registry;
mod store;
mod value;

pub use async_coordinator::{AsyncCacheCoordinator, AsyncKeyLockRegistry};
pub use config::CacheConfig;
pub use coordinator::CacheCoordinator;
pub use error::{BoxError, CacheError};
pub use keys::{Dependencies, LockHash, dependencies};
pub use registry::{KeyLockHandle, KeyLockRegistry};
pub use store::{CacheStore, MemoryStore, NullStore, store_from_config};
pub use value::CachedValue;
