use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::trace;

use crate::engine::bucket::{transition, Admission, BucketParams, BucketState};
use crate::engine::entry::{BucketEntry, Entry};
use crate::error::{Error, Result};
use crate::types::Key;

/// Entry in the TTL expiration queue
#[derive(Debug, Eq, PartialEq)]
struct TtlEntry {
    expires_at: i64,
    key: Key,
}

impl Ord for TtlEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: smaller expires_at has higher priority
        Reverse(self.expires_at).cmp(&Reverse(other.expires_at))
    }
}

impl PartialOrd for TtlEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Individual shard containing a portion of the keyspace.
///
/// Each shard has:
/// - Its own HashMap for typed entries
/// - Its own TTL queue for bucket eviction, holding at most one
///   deadline per key
pub struct Shard {
    /// Shard ID for debugging/metrics
    id: usize,

    /// Key-value storage
    data: FxHashMap<Key, Entry>,

    /// TTL expiration queue (min-heap by expiration time)
    ttl_queue: BinaryHeap<TtlEntry>,

    /// Seconds a full bucket is kept before it becomes evictable
    ttl_grace: Option<i64>,
}

impl Shard {
    /// Create a new shard. `ttl_grace` of `None` disables bucket eviction.
    pub fn new(id: usize, ttl_grace: Option<i64>) -> Self {
        Self {
            id,
            data: FxHashMap::default(),
            ttl_queue: BinaryHeap::new(),
            ttl_grace,
        }
    }

    /// Run the token bucket transition for a key.
    ///
    /// The caller holds the shard exclusively, so load, refill, decision
    /// and store happen without any other operation on the key in between.
    pub fn token_bucket(&mut self, key: Key, params: &BucketParams) -> Result<Admission> {
        let prev = match self.data.get(&key) {
            Some(Entry::Bucket(b)) => Some(b.state),
            Some(_) => return Err(Error::WrongType),
            None => None,
        };

        let t = transition(prev, params);
        let expires_at = match (t.full_at, self.ttl_grace) {
            (Some(full_at), Some(grace)) => Some(full_at.saturating_add(grace)),
            _ => None,
        };

        let entry = match self.data.entry(key.clone()).or_insert_with(|| {
            Entry::Bucket(BucketEntry::new(t.state))
        }) {
            Entry::Bucket(b) => b,
            _ => return Err(Error::WrongType),
        };
        entry.state = t.state;
        entry.set_expires_at(expires_at);

        if let (Some(exp), None) = (expires_at, entry.scheduled) {
            entry.scheduled = Some(exp);
            self.ttl_queue.push(TtlEntry { expires_at: exp, key });
        }

        Ok(t.admission)
    }

    /// Read the stored state of a bucket
    pub fn bucket(&self, key: &Key) -> Result<Option<BucketState>> {
        match self.data.get(key) {
            Some(Entry::Bucket(b)) => Ok(Some(b.state)),
            Some(_) => Err(Error::WrongType),
            None => Ok(None),
        }
    }

    /// Set fields on a hash, returning the number of newly created fields
    pub fn hset(&mut self, key: Key, fields: Vec<(Bytes, Bytes)>) -> Result<usize> {
        let entry = self
            .data
            .entry(key)
            .or_insert_with(|| Entry::Hash(FxHashMap::default()));
        let hash = match entry {
            Entry::Hash(h) => h,
            _ => return Err(Error::WrongType),
        };

        let mut created = 0;
        for (field, value) in fields {
            if hash.insert(field, value).is_none() {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Get all fields of a hash; absent keys read as empty
    pub fn hgetall(&self, key: &Key) -> Result<Vec<(Bytes, Bytes)>> {
        match self.data.get(key) {
            Some(Entry::Hash(h)) => Ok(h.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(_) => Err(Error::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Add members to a set, returning the number of new members
    pub fn sadd(&mut self, key: Key, members: Vec<Bytes>) -> Result<usize> {
        let entry = self
            .data
            .entry(key)
            .or_insert_with(|| Entry::Set(Default::default()));
        let set = match entry {
            Entry::Set(s) => s,
            _ => return Err(Error::WrongType),
        };

        Ok(members.into_iter().filter(|m| set.insert(m.clone())).count())
    }

    /// Remove members from a set, returning how many were present.
    /// An emptied set is removed.
    pub fn srem(&mut self, key: &Key, members: &[Bytes]) -> Result<usize> {
        let set = match self.data.get_mut(key) {
            Some(Entry::Set(s)) => s,
            Some(_) => return Err(Error::WrongType),
            None => return Ok(0),
        };

        let removed = members.iter().filter(|m| set.remove(*m)).count();
        if set.is_empty() {
            self.data.remove(key);
        }
        Ok(removed)
    }

    /// List members of a set; absent keys read as empty
    pub fn smembers(&self, key: &Key) -> Result<Vec<Bytes>> {
        match self.data.get(key) {
            Some(Entry::Set(s)) => Ok(s.iter().cloned().collect()),
            Some(_) => Err(Error::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a key of any type
    pub fn del(&mut self, key: &Key) -> bool {
        self.data.remove(key).is_some()
    }

    /// Expire bucket entries that have passed their TTL.
    /// Returns the number of expired entries.
    pub fn expire_entries(&mut self, current_ts: i64) -> usize {
        let mut expired = 0;

        while let Some(ttl_entry) = self.ttl_queue.peek() {
            if ttl_entry.expires_at > current_ts {
                break;
            }

            let Some(ttl_entry) = self.ttl_queue.pop() else {
                break;
            };

            // The deadline may have moved or been cleared since it was queued
            let Some(Entry::Bucket(b)) = self.data.get_mut(&ttl_entry.key) else {
                continue;
            };
            if b.is_expired(current_ts) {
                self.data.remove(&ttl_entry.key);
                expired += 1;
                continue;
            }
            b.scheduled = b.expires_at();
            if let Some(expires_at) = b.scheduled {
                self.ttl_queue.push(TtlEntry {
                    expires_at,
                    key: ttl_entry.key,
                });
            }
        }

        if expired > 0 {
            trace!(shard = self.id, expired, "evicted idle buckets");
        }
        expired
    }

    /// Number of queued TTL deadlines
    #[inline]
    pub fn ttl_queue_len(&self) -> usize {
        self.ttl_queue.len()
    }

    /// Get entry count for metrics
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the shard is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
