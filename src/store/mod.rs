//! Shared state store adapters.
//!
//! The admission engine needs exactly one capability from a store: run a
//! token bucket transition on one key with nothing else interleaving on that
//! key. [`BucketStore`] is that capability. [`RecordStore`] is the plain
//! hash/set surface the rule registry is built on.
//!
//! Implementations:
//! - [`ShardedDb`](crate::engine::ShardedDb): in-process, per-shard write lock
//! - [`RemoteStore`]: a store server reached over RESP, `TBALLOW` runs
//!   server-side under the shard lock
//! - [`CasBucketStore`]: optimistic compare-and-swap over any
//!   [`VersionedStore`]

mod cas;
mod local;
mod remote;

pub use cas::{CasBucketStore, MemoryVersionedStore, VersionedStore, DEFAULT_MAX_ATTEMPTS};
pub use remote::RemoteStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::engine::{Admission, BucketParams};
use crate::error::Result;
use crate::types::Key;

/// Atomic token bucket transition on one key.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Load, refill, decide and persist the bucket under `key` as one
    /// indivisible step, returning the decision computed inside it.
    async fn token_bucket(&self, key: &Key, params: BucketParams) -> Result<Admission>;
}

/// Hash and set records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Set fields of the hash under `key`, creating it if needed.
    async fn hset(&self, key: &Key, fields: Vec<(Bytes, Bytes)>) -> Result<()>;

    /// All fields of the hash under `key`; empty if absent.
    async fn hgetall(&self, key: &Key) -> Result<Vec<(Bytes, Bytes)>>;

    /// Delete `key` of any type. Returns whether it existed.
    async fn del(&self, key: &Key) -> Result<bool>;

    /// Add a member to the set under `key`.
    async fn sadd(&self, key: &Key, member: Bytes) -> Result<()>;

    /// Remove a member from the set under `key`. Returns whether it was there.
    async fn srem(&self, key: &Key, member: Bytes) -> Result<bool>;

    /// Members of the set under `key`; empty if absent.
    async fn smembers(&self, key: &Key) -> Result<Vec<Bytes>>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;
}
