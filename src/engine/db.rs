use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::Config;
use crate::engine::bucket::{Admission, BucketParams, BucketState};
use crate::engine::Shard;
use crate::error::Result;
use crate::types::Key;

/// Thread-safe sharded state store.
///
/// Each shard is protected by its own RwLock to minimize contention.
/// Reads are concurrent within a shard; writes acquire exclusive access,
/// which is what makes a token bucket transition atomic per key.
///
/// Keys are routed to shards using: shard_index = key.shard_hash() % num_shards
///
/// Eviction deadlines are computed from the callers' `now`, so expiry never
/// runs ahead of the latest `now` any caller has sent.
pub struct ShardedDb {
    shards: Vec<RwLock<Shard>>,
    num_shards: usize,
    latest_now: AtomicI64,
}

impl ShardedDb {
    /// Create a new ShardedDb with the given configuration.
    pub fn new(config: &Config) -> Self {
        let ttl_grace = config.enable_ttl.then_some(config.ttl_grace_secs as i64);
        Self::with_shards(config.shards, ttl_grace)
    }

    /// Create a ShardedDb with an explicit shard count and eviction grace.
    pub fn with_shards(num_shards: usize, ttl_grace: Option<i64>) -> Self {
        let num_shards = num_shards.max(1);
        let shards = (0..num_shards)
            .map(|id| RwLock::new(Shard::new(id, ttl_grace)))
            .collect();

        Self {
            shards,
            num_shards,
            latest_now: AtomicI64::new(i64::MIN),
        }
    }

    /// Route a key to its shard index.
    #[inline]
    fn shard_index(&self, key: &Key) -> usize {
        (key.shard_hash() as usize) % self.num_shards
    }

    /// Run the token bucket transition for a key atomically.
    #[inline]
    pub fn token_bucket(&self, key: Key, params: &BucketParams) -> Result<Admission> {
        self.latest_now.fetch_max(params.now, Ordering::Relaxed);
        let idx = self.shard_index(&key);
        self.shards[idx].write().token_bucket(key, params)
    }

    /// Read the stored state of a bucket.
    pub fn bucket(&self, key: &Key) -> Result<Option<BucketState>> {
        let idx = self.shard_index(key);
        self.shards[idx].read().bucket(key)
    }

    /// Set fields on a hash.
    pub fn hset(&self, key: Key, fields: Vec<(Bytes, Bytes)>) -> Result<usize> {
        let idx = self.shard_index(&key);
        self.shards[idx].write().hset(key, fields)
    }

    /// Get all fields of a hash.
    pub fn hgetall(&self, key: &Key) -> Result<Vec<(Bytes, Bytes)>> {
        let idx = self.shard_index(key);
        self.shards[idx].read().hgetall(key)
    }

    /// Add members to a set.
    pub fn sadd(&self, key: Key, members: Vec<Bytes>) -> Result<usize> {
        let idx = self.shard_index(&key);
        self.shards[idx].write().sadd(key, members)
    }

    /// Remove members from a set.
    pub fn srem(&self, key: &Key, members: &[Bytes]) -> Result<usize> {
        let idx = self.shard_index(key);
        self.shards[idx].write().srem(key, members)
    }

    /// List members of a set.
    pub fn smembers(&self, key: &Key) -> Result<Vec<Bytes>> {
        let idx = self.shard_index(key);
        self.shards[idx].read().smembers(key)
    }

    /// Delete a key.
    pub fn del(&self, key: &Key) -> bool {
        let idx = self.shard_index(key);
        self.shards[idx].write().del(key)
    }

    /// Run TTL expiration across all shards.
    /// Returns the total number of expired entries.
    ///
    /// `current_ts` is capped at the latest caller `now`, so a store clock
    /// running ahead of its callers cannot evict a bucket that is not yet
    /// full in caller time.
    pub fn expire_all(&self, current_ts: i64) -> usize {
        let horizon = current_ts.min(self.latest_now.load(Ordering::Relaxed));
        self.shards
            .iter()
            .map(|s| s.write().expire_entries(horizon))
            .sum()
    }

    /// Get total entry count across all shards.
    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Get per-shard entry counts (for metrics).
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.read().len()).collect()
    }
}
