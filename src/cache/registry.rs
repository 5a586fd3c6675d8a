//! Key lock registry.
//!
//! Maps a `LockHash` to the lock object guarding it. Entries are created on
//! first use and removed as soon as the last handle referring to them is
//! dropped, so the registry only ever holds locks for critical sections that
//! are currently running or waited on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::gauge;
use tracing::trace;

use super::keys::LockHash;

const METRIC_LOCK_REGISTRY_LEN: &str = "keylock_lock_registry_len";

struct KeySlot<L> {
    lock: L,
    // Only touched while the owning DashMap shard is write-locked.
    holders: AtomicUsize,
}

/// Concurrent registry of per-hash locks.
///
/// `L` is the lock type: `std::sync::Mutex<()>` for blocking callers,
/// `tokio::sync::Mutex<()>` for async ones. Distinct hashes live in
/// independent DashMap shards and never share a lock object.
///
/// Inserts and removals publish `keylock_lock_registry_len` from a
/// `len()` sampled after the shard lock is released. Under concurrent churn
/// on other shards the gauge is a recent sample, not an exact count; it
/// settles on the true length once the registry is quiet.
pub struct KeyLockRegistry<L = Mutex<()>> {
    slots: DashMap<LockHash, Arc<KeySlot<L>>>,
}

impl<L: Default> KeyLockRegistry<L> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Return a handle on the lock for `hash`, creating it if absent.
    ///
    /// The handle does not lock anything by itself; callers lock
    /// [`KeyLockHandle::lock`] for the duration of their critical section.
    pub fn acquire_or_create(&self, hash: LockHash) -> KeyLockHandle<'_, L> {
        let (slot, created) = match self.slots.entry(hash.clone()) {
            Entry::Occupied(occupied) => {
                let slot = Arc::clone(occupied.get());
                slot.holders.fetch_add(1, Ordering::Relaxed);
                (slot, false)
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(KeySlot {
                    lock: L::default(),
                    holders: AtomicUsize::new(1),
                });
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        };
        // `len()` read-locks every shard, so it must run after the entry guard drops.
        if created {
            self.publish_len();
        }

        trace!(lock_hash = %hash, "Key lock handle acquired");
        KeyLockHandle {
            registry: self,
            hash,
            slot,
        }
    }
}

impl<L> KeyLockRegistry<L> {
    /// Number of lock objects currently registered.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn release(&self, hash: &LockHash, slot: &Arc<KeySlot<L>>) {
        // Remove-if-present: a slot that is no longer (or never was) the
        // registered one is left alone.
        let removed = self
            .slots
            .remove_if(hash, |_, current| {
                Arc::ptr_eq(current, slot) && current.holders.fetch_sub(1, Ordering::Relaxed) == 1
            })
            .is_some();

        if removed {
            self.publish_len();
        }
        trace!(lock_hash = %hash, removed, "Key lock handle released");
    }

    fn publish_len(&self) {
        gauge!(METRIC_LOCK_REGISTRY_LEN).set(self.slots.len() as f64);
    }
}

impl<L: Default> Default for KeyLockRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// A caller's claim on one registered lock.
///
/// Dropping the handle releases the claim; the registry entry disappears with
/// the last claim. Lock guards borrow from the handle, so the borrow checker
/// keeps the lock held strictly inside the handle's lifetime.
#[must_use = "dropping the handle releases the key lock immediately"]
pub struct KeyLockHandle<'a, L = Mutex<()>> {
    registry: &'a KeyLockRegistry<L>,
    hash: LockHash,
    slot: Arc<KeySlot<L>>,
}

impl<L> KeyLockHandle<'_, L> {
    pub fn hash(&self) -> &LockHash {
        &self.hash
    }

    pub fn lock(&self) -> &L {
        &self.slot.lock
    }

    /// Release explicitly; equivalent to dropping the handle.
    pub fn release(self) {}
}

impl<L> Drop for KeyLockHandle<'_, L> {
    fn drop(&mut self) {
        self.registry.release(&self.hash, &self.slot);
    }
}
