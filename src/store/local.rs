use async_trait::async_trait;
use bytes::Bytes;

use crate::engine::{Admission, BucketParams, ShardedDb};
use crate::error::Result;
use crate::store::{BucketStore, RecordStore};
use crate::types::Key;

// Shard locks are held only for the in-memory operation itself, so the
// methods complete without yielding.

#[async_trait]
impl BucketStore for ShardedDb {
    async fn token_bucket(&self, key: &Key, params: BucketParams) -> Result<Admission> {
        ShardedDb::token_bucket(self, key.clone(), &params)
    }
}

#[async_trait]
impl RecordStore for ShardedDb {
    async fn hset(&self, key: &Key, fields: Vec<(Bytes, Bytes)>) -> Result<()> {
        ShardedDb::hset(self, key.clone(), fields).map(|_| ())
    }

    async fn hgetall(&self, key: &Key) -> Result<Vec<(Bytes, Bytes)>> {
        ShardedDb::hgetall(self, key)
    }

    async fn del(&self, key: &Key) -> Result<bool> {
        Ok(ShardedDb::del(self, key))
    }

    async fn sadd(&self, key: &Key, member: Bytes) -> Result<()> {
        ShardedDb::sadd(self, key.clone(), vec![member]).map(|_| ())
    }

    async fn srem(&self, key: &Key, member: Bytes) -> Result<bool> {
        ShardedDb::srem(self, key, &[member]).map(|n| n > 0)
    }

    async fn smembers(&self, key: &Key) -> Result<Vec<Bytes>> {
        ShardedDb::smembers(self, key)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
