//! Write correlation
//!
//! A write is observed twice: at entry, where the pre-write size is known,
//! and at exit, where the transferred length and the final size are known.
//! The entry handler parks the pre-write size here under a token that is
//! unique to the write attempt, and the exit handler takes it back.
//!
//! Capacity is bounded. When full, the least recently seeded entry of the
//! shard is evicted, and its exit later reads as uncorrelated.

use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default number of in-flight writes tracked
pub const DEFAULT_CORRELATION_CAPACITY: usize = 1024;

const MAX_SHARDS: usize = 16;
const MIN_SHARD_CAPACITY: usize = 64;

/// Identity of one in-flight write attempt.
///
/// `pid_tgid` alone is not enough: a thread can have several writes in
/// flight (e.g. through io_uring), so the attempt discriminator must differ
/// between them. Hook glue typically uses the `struct file` address or the
/// request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken {
    /// `tgid << 32 | pid` of the writing task
    pub pid_tgid: u64,
    /// Discriminator for concurrent attempts of the same task
    pub attempt: u64,
}

impl CorrelationToken {
    /// Create a token
    pub const fn new(pid_tgid: u64, attempt: u64) -> Self {
        Self { pid_tgid, attempt }
    }

    /// Thread group id (userspace pid)
    pub fn tgid(&self) -> u32 {
        (self.pid_tgid >> 32) as u32
    }

    /// Thread id
    pub fn tid(&self) -> u32 {
        self.pid_tgid as u32
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    before_size: i64,
    stamp: u64,
}

struct Shard {
    entries: HashMap<CorrelationToken, Pending>,
    capacity: usize,
    clock: u64,
}

impl Shard {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            clock: 0,
        }
    }

    fn evict_oldest(&mut self) -> Option<CorrelationToken> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, pending)| pending.stamp)
            .map(|(token, _)| *token)?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// Bounded scratch table bridging write-entry and write-exit
pub struct WriteCorrelationStore {
    shards: Box<[Mutex<Shard>]>,
    capacity: usize,
    hasher: RandomState,
    evictions: AtomicU64,
}

impl Default for WriteCorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_CAPACITY)
    }
}

impl WriteCorrelationStore {
    /// Create a store tracking at most `capacity` pending writes.
    ///
    /// Small stores use a single shard, which makes eviction exact LRU;
    /// larger ones are sharded and evict the LRU entry of the full shard.
    /// Shard capacities add up to exactly `capacity`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let shard_count = (capacity / MIN_SHARD_CAPACITY).clamp(1, MAX_SHARDS);
        let base = capacity / shard_count;
        let extra = capacity % shard_count;
        let shards = (0..shard_count)
            .map(|i| Mutex::new(Shard::with_capacity(base + usize::from(i < extra))))
            .collect();

        Self {
            shards,
            capacity,
            hasher: RandomState::new(),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, token: &CorrelationToken) -> &Mutex<Shard> {
        let index = (self.hasher.hash_one(token) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Park the pre-write size for `token`.
    ///
    /// Returns the token evicted to make room, if any.
    pub fn begin(&self, token: CorrelationToken, before_size: i64) -> Option<CorrelationToken> {
        let mut shard = self.shard(&token).lock();
        shard.clock += 1;
        let stamp = shard.clock;

        let evicted = if !shard.entries.contains_key(&token)
            && shard.entries.len() >= shard.capacity
        {
            shard.evict_oldest()
        } else {
            None
        };

        shard.entries.insert(token, Pending { before_size, stamp });
        drop(shard);

        if let Some(victim) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(tgid = victim.tgid(), tid = victim.tid(), "evicted pending write");
        }
        evicted
    }

    /// Remove and return the pre-write size parked for `token`
    pub fn take(&self, token: &CorrelationToken) -> Option<i64> {
        self.shard(token)
            .lock()
            .entries
            .remove(token)
            .map(|pending| pending.before_size)
    }

    /// Number of pending writes
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    /// Whether no write is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total capacity across shards
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
