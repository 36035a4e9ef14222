//! Policy store
//!
//! The watched set: a fixed-capacity table from [`EntityKey`] to
//! [`PolicyRecord`], consulted by every hook before it does any work.
//!
//! The table is split into independently locked shards. Each lock is held
//! for exactly one hash-map operation and never across other work, so two
//! handlers only ever wait on each other when their keys land in the same
//! shard, and then only for that single O(1) operation.

use crate::error::PolicyError;
use crate::key::EntityKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of watched entities
pub const DEFAULT_POLICY_CAPACITY: usize = 4000;

const SHARD_COUNT: usize = 64;

/// Per-entity state kept for a watched object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Last observed size in bytes, if one has been recorded
    pub file_size: Option<i64>,
}

impl PolicyRecord {
    /// Record with a known size
    pub fn with_size(size: i64) -> Self {
        Self {
            file_size: Some(size),
        }
    }

    /// Record without size information
    pub fn without_size() -> Self {
        Self { file_size: None }
    }
}

/// Concurrent, fixed-capacity watched-entity table
pub struct PolicyStore {
    shards: Box<[RwLock<HashMap<EntityKey, PolicyRecord>>]>,
    hasher: RandomState,
    len: AtomicUsize,
    capacity: usize,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(DEFAULT_POLICY_CAPACITY)
    }
}

impl PolicyStore {
    /// Create an empty store holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(SHARD_COUNT);
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(HashMap::with_capacity(per_shard)))
            .collect();

        Self {
            shards,
            hasher: RandomState::new(),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn shard(&self, key: &EntityKey) -> &RwLock<HashMap<EntityKey, PolicyRecord>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Look up a watched entity. The hot path of every hook.
    pub fn lookup(&self, key: &EntityKey) -> Option<PolicyRecord> {
        self.shard(key).read().get(key).copied()
    }

    /// Whether the entity is watched
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Insert or replace a record.
    ///
    /// Replacing an existing key always succeeds; adding a new key fails
    /// once the store holds `capacity` entries.
    pub fn insert(&self, key: EntityKey, record: PolicyRecord) -> Result<(), PolicyError> {
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(record);
                Ok(())
            }
            Entry::Vacant(slot) => {
                self.len
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                        (len < self.capacity).then_some(len + 1)
                    })
                    .map_err(|_| PolicyError::CapacityExceeded {
                        capacity: self.capacity,
                    })?;
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Replace the record of an already-watched entity.
    ///
    /// Returns `false` (and stores nothing) if the key is not watched.
    pub fn update(&self, key: &EntityKey, record: PolicyRecord) -> bool {
        match self.shard(key).write().get_mut(key) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => false,
        }
    }

    /// Remove an entity. Removing an absent key is a no-op.
    pub fn delete(&self, key: &EntityKey) -> bool {
        self.take(key).is_some()
    }

    /// Remove an entity and return its record.
    ///
    /// Of any number of concurrent callers for the same key, exactly one
    /// receives `Some`.
    pub fn take(&self, key: &EntityKey) -> Option<PolicyRecord> {
        let removed = self.shard(key).write().remove(key);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Number of watched entities
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether nothing is watched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of watched entities
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Point-in-time copy of the watched set, sorted by key
    pub fn snapshot(&self) -> Vec<(EntityKey, PolicyRecord)> {
        let mut entries: Vec<_> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(k, v)| (*k, *v))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries
    }
}
