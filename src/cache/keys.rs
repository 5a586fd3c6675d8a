//! Cache key helpers.
//!
//! Defines `LockHash`, the derived name of a key lock, and `Dependencies`, the
//! hint set callers may attach to stored values.

use std::collections::BTreeSet;
use std::fmt;

/// Dependency hints attached to a cached value.
///
/// Accepted by `store` and `get_or_add` and counted in debug logs. They are
/// not forwarded to the underlying store.
pub type Dependencies = BTreeSet<String>;

/// Build a dependency set from anything string-like.
pub fn dependencies<I, S>(items: I) -> Dependencies
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

pub(crate) fn dependency_count(dependencies: Option<&Dependencies>) -> usize {
    dependencies.map_or(0, BTreeSet::len)
}

/// Name of the lock guarding one read-compute-write cycle.
///
/// Rendered as `"{region}:{key}:{depth}"`, where `depth` is the caller's
/// reentrancy depth. Pairs whose parts contain `:` can render identically
/// (`("b:c", "a")` and `("c", "a:b")`); they then share a lock and serialize
/// against each other, which costs throughput but never correctness.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockHash(String);

impl LockHash {
    pub fn new(key: &str, region: &str, depth: usize) -> Self {
        Self(format!("{region}:{key}:{depth}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
