//! Cache configuration.
//!
//! Controls whether values are retained at all and how many entries each
//! region of the in-memory store keeps.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_REGION_CAPACITY: usize = 1000;

/// Cache configuration, usually the `[cache]` table of `keylock.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Retain produced values. When off, every `get_or_add` runs its producer.
    pub enabled: bool,
    /// Entries kept per region unless the region has its own limit.
    pub region_capacity: usize,
    /// Per-region overrides of `region_capacity`.
    pub region_limits: HashMap<String, usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region_capacity: DEFAULT_REGION_CAPACITY,
            region_limits: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Capacity of `region`, clamping zero to one.
    pub fn capacity_for(&self, region: &str) -> NonZeroUsize {
        let limit = self
            .region_limits
            .get(region)
            .copied()
            .unwrap_or(self.region_capacity);
        NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
    }
}
