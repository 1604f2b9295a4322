use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::bucket::BucketState;

/// Entry type in the store - a token bucket, a field map, or a member set.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Token bucket state owned by the admission transition
    Bucket(BucketEntry),
    /// Field map (rule records)
    Hash(FxHashMap<Bytes, Bytes>),
    /// Unordered member set (rule index)
    Set(FxHashSet<Bytes>),
}

impl Entry {
    /// Check if this is a bucket entry.
    #[inline]
    pub fn is_bucket(&self) -> bool {
        matches!(self, Entry::Bucket(_))
    }

    /// Get as bucket reference, if it is one.
    #[inline]
    pub fn as_bucket(&self) -> Option<&BucketEntry> {
        match self {
            Entry::Bucket(b) => Some(b),
            _ => None,
        }
    }

    /// Get as hash reference, if it is one.
    #[inline]
    pub fn as_hash(&self) -> Option<&FxHashMap<Bytes, Bytes>> {
        match self {
            Entry::Hash(h) => Some(h),
            _ => None,
        }
    }

    /// Get as set reference, if it is one.
    #[inline]
    pub fn as_set(&self) -> Option<&FxHashSet<Bytes>> {
        match self {
            Entry::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the entry has passed its expiration time.
    /// Only buckets carry a TTL.
    #[inline]
    pub fn is_expired(&self, current_ts: i64) -> bool {
        match self {
            Entry::Bucket(b) => b.is_expired(current_ts),
            _ => false,
        }
    }
}

impl From<BucketEntry> for Entry {
    fn from(bucket: BucketEntry) -> Self {
        Entry::Bucket(bucket)
    }
}

/// Stored bucket state plus its eviction deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketEntry {
    pub state: BucketState,

    /// Unix timestamp (seconds) after which the entry may be evicted
    expires_at: Option<i64>,

    /// Deadline currently queued in the shard's TTL heap for this key
    pub(crate) scheduled: Option<i64>,
}

impl BucketEntry {
    pub fn new(state: BucketState) -> Self {
        Self {
            state,
            expires_at: None,
            scheduled: None,
        }
    }

    /// Set expiration time
    #[inline]
    pub fn set_expires_at(&mut self, ts: Option<i64>) {
        self.expires_at = ts;
    }

    /// Get expiration time
    #[inline]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Check if entry is expired
    #[inline]
    pub fn is_expired(&self, current_ts: i64) -> bool {
        self.expires_at.map_or(false, |exp| current_ts >= exp)
    }
}
