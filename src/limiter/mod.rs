//! Admission engine entry point.
//!
//! [`Limiter::allow`] is the contract callers see: validate the inputs,
//! then hand the whole transition to the store in one call. The limiter
//! holds no per-key state and takes no locks of its own; all coordination
//! between concurrent callers happens inside the [`BucketStore`].

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use std::sync::Arc;
use tracing::debug;

use crate::engine::{Admission, BucketParams};
use crate::error::{Error, Result};
use crate::store::BucketStore;
use crate::types::Key;

/// Largest capacity, refill rate or request the transition represents
/// exactly (integers up to 2^53 are exact in `f64`).
pub const MAX_EXACT: i64 = 1 << 53;

/// Stateless admission engine over a shared bucket store.
#[derive(Clone)]
pub struct Limiter {
    store: Arc<dyn BucketStore>,
}

impl Limiter {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self { store }
    }

    /// Decide whether `requested` tokens may be taken from the bucket under
    /// `key` at second `now`.
    ///
    /// Negative or oversized inputs are rejected as validation errors
    /// before the store is touched. Store failures propagate unchanged;
    /// callers must treat them as a denial.
    pub async fn allow(
        &self,
        key: &Key,
        now: i64,
        refill_rate: i64,
        capacity: i64,
        requested: i64,
    ) -> Result<Admission> {
        let params = BucketParams {
            now: check_range("now", now, i64::MAX)?,
            refill_rate: check_range("refill_rate", refill_rate, MAX_EXACT)? as u64,
            capacity: check_range("capacity", capacity, MAX_EXACT)? as u64,
            requested: check_range("tokens_requested", requested, MAX_EXACT)? as u64,
        };

        let admission = self.store.token_bucket(key, params).await?;
        debug!(
            "{} requested={} allowed={} remaining={} retry_after_ms={}",
            key,
            requested,
            admission.allowed,
            admission.remaining,
            admission.retry_after_ms()
        );
        Ok(admission)
    }
}

fn check_range(name: &str, value: i64, max: i64) -> Result<i64> {
    if value < 0 {
        return Err(Error::validation(format!("{} must not be negative", name)));
    }
    if value > max {
        return Err(Error::validation(format!("{} must be at most {}", name, max)));
    }
    Ok(value)
}
