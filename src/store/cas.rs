use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::engine::{transition, Admission, BucketParams, BucketState};
use crate::error::{Error, Result};
use crate::store::BucketStore;
use crate::types::Key;

/// Attempts before a contended transition gives up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 128;

/// Key-value storage of bucket states with a per-key version, for stores
/// that offer conditional writes but no server-side scripting.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Current state and its version, `None` if the key is absent.
    async fn load(&self, key: &Key) -> Result<Option<(BucketState, u64)>>;

    /// Write `state` only if the stored version still equals `expected`
    /// (`None` meaning "still absent"). Returns `false` on conflict.
    async fn compare_and_swap(
        &self,
        key: &Key,
        expected: Option<u64>,
        state: BucketState,
    ) -> Result<bool>;
}

/// In-memory [`VersionedStore`].
#[derive(Default)]
pub struct MemoryVersionedStore {
    data: Mutex<FxHashMap<Key, (BucketState, u64)>>,
}

impl MemoryVersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

#[async_trait]
impl VersionedStore for MemoryVersionedStore {
    async fn load(&self, key: &Key) -> Result<Option<(BucketState, u64)>> {
        Ok(self.data.lock().get(key).copied())
    }

    async fn compare_and_swap(
        &self,
        key: &Key,
        expected: Option<u64>,
        state: BucketState,
    ) -> Result<bool> {
        let mut data = self.data.lock();
        let current = data.get(key).map(|(_, version)| *version);
        if current != expected {
            return Ok(false);
        }
        let next = expected.map_or(1, |v| v.wrapping_add(1));
        data.insert(key.clone(), (state, next));
        Ok(true)
    }
}

/// [`BucketStore`] that makes the transition atomic with an optimistic
/// read, compute, conditional-write loop.
///
/// The transition is pure, so a lost race simply recomputes from the newer
/// state. Denials are written too: the refill baseline must advance.
pub struct CasBucketStore<V> {
    inner: V,
    max_attempts: usize,
}

impl<V: VersionedStore> CasBucketStore<V> {
    pub fn new(inner: V) -> Self {
        Self::with_max_attempts(inner, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(inner: V, max_attempts: usize) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }
}

#[async_trait]
impl<V: VersionedStore> BucketStore for CasBucketStore<V> {
    async fn token_bucket(&self, key: &Key, params: BucketParams) -> Result<Admission> {
        for attempt in 1..=self.max_attempts {
            let current = self.inner.load(key).await?;
            let t = transition(current.map(|(state, _)| state), &params);
            let expected = current.map(|(_, version)| version);

            if self.inner.compare_and_swap(key, expected, t.state).await? {
                return Ok(t.admission);
            }

            debug!("CAS conflict on {} (attempt {})", key, attempt);
            tokio::task::yield_now().await;
        }

        Err(Error::store(format!(
            "gave up on {} after {} conflicting attempts",
            key, self.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RetryAfter;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn params(now: i64, refill_rate: u64, capacity: u64) -> BucketParams {
        BucketParams {
            now,
            refill_rate,
            capacity,
            requested: 1,
        }
    }

    #[tokio::test]
    async fn test_sequence_matches_locked_semantics() {
        let store = CasBucketStore::new(MemoryVersionedStore::new());
        let key = Key::from("rl:t:r:s");

        for expected in [2, 1, 0] {
            let a = store.token_bucket(&key, params(5, 0, 3)).await.unwrap();
            assert!(a.allowed);
            assert_eq!(a.remaining, expected);
        }
        let a = store.token_bucket(&key, params(5, 0, 3)).await.unwrap();
        assert!(!a.allowed);
        assert_eq!(a.retry_after, RetryAfter::Never);
    }

    #[tokio::test]
    async fn test_denial_still_advances_baseline() {
        let store = CasBucketStore::new(MemoryVersionedStore::new());
        let key = Key::from("rl:t:r:s");

        store.token_bucket(&key, params(0, 1, 1)).await.unwrap();
        store.token_bucket(&key, params(0, 1, 1)).await.unwrap();

        let (state, version) = store.inner().load(&key).await.unwrap().unwrap();
        assert_eq!(version, 2);
        assert_eq!(state.last_refill_at, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_over_admit() {
        let store = Arc::new(CasBucketStore::new(MemoryVersionedStore::new()));
        let admitted = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    let key = Key::from("rl:t:r:hot");
                    for _ in 0..50 {
                        let a = store.token_bucket(&key, params(1, 0, 100)).await.unwrap();
                        if a.allowed {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 100);
    }

    /// Store whose writes always lose the race.
    struct AlwaysConflicts;

    #[async_trait]
    impl VersionedStore for AlwaysConflicts {
        async fn load(&self, _key: &Key) -> Result<Option<(BucketState, u64)>> {
            Ok(None)
        }

        async fn compare_and_swap(
            &self,
            _key: &Key,
            _expected: Option<u64>,
            _state: BucketState,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_bounded_attempts_fail_closed() {
        let store = CasBucketStore::with_max_attempts(AlwaysConflicts, 3);
        let err = store
            .token_bucket(&Key::from("k"), params(0, 1, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
    }
}
