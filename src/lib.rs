//! Compute-once, re-entrancy-safe caching in front of a key/region cache store.
//!
//! [`cache::CacheCoordinator`] (blocking) and [`cache::AsyncCacheCoordinator`]
//! (tokio) expose `store`, `try_get` and `get_or_add`. [`config`] loads
//! layered settings and [`telemetry`] installs the tracing pipeline.

pub mod cache;
pub mod config;
pub mod telemetry;
