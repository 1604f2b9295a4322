//! Token bucket state transition.
//!
//! The whole admission decision is one pure function from the previous
//! bucket state to the next one. Store adapters run it inside whatever
//! per-key atomic section they provide (a shard lock, a CAS loop, or a
//! remote command), so the refill and the deduction are always committed
//! together.

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Currently available tokens, `0 <= tokens <= capacity`
    pub tokens: f64,

    /// Unix timestamp (seconds) of the last refill computation
    pub last_refill_at: i64,
}

impl BucketState {
    /// A full bucket as seen on first access.
    #[inline]
    pub fn full(capacity: u64, now: i64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill_at: now,
        }
    }
}

/// Inputs of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    /// Caller's wall clock in seconds
    pub now: i64,
    /// Tokens added per second, 0 means the bucket never refills
    pub refill_rate: u64,
    /// Maximum tokens held by the bucket
    pub capacity: u64,
    /// Tokens the caller wants to consume
    pub requested: u64,
}

/// How long a denied caller should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfter {
    /// Request was admitted
    Immediately,
    /// Estimated wait until enough tokens exist
    Millis(u64),
    /// The bucket will never refill enough to satisfy the request
    Never,
}

impl RetryAfter {
    /// Wire representation: `0`, the wait in ms, or `-1` for no estimate.
    #[inline]
    pub fn as_millis_sentinel(&self) -> i64 {
        match self {
            RetryAfter::Immediately => 0,
            RetryAfter::Millis(ms) => i64::try_from(*ms).unwrap_or(i64::MAX),
            RetryAfter::Never => -1,
        }
    }

    /// Parse the wire representation back.
    pub fn from_millis_sentinel(ms: i64) -> Option<Self> {
        match ms {
            -1 => Some(RetryAfter::Never),
            0 => Some(RetryAfter::Immediately),
            ms if ms > 0 => Some(RetryAfter::Millis(ms as u64)),
            _ => None,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Whole tokens left after this check, always within `[0, capacity]`
    pub remaining: u64,
    pub retry_after: RetryAfter,
}

impl Admission {
    /// Retry-after in milliseconds using `-1` as the "never" sentinel.
    #[inline]
    pub fn retry_after_ms(&self) -> i64 {
        self.retry_after.as_millis_sentinel()
    }
}

/// Result of applying a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    /// State to persist for the key
    pub state: BucketState,
    /// Decision returned to the caller
    pub admission: Admission,
    /// Second at which the bucket is full again, `None` if it never refills.
    /// From that point the stored state is equivalent to an absent one.
    pub full_at: Option<i64>,
}

/// Apply one admission check to the previous state of a bucket.
///
/// An absent state initializes to a full bucket at `now`. The refill
/// baseline only moves forward: a caller whose clock lags behind the last
/// writer does not rewind it, which would let the next caller refill the
/// same interval twice.
pub fn transition(prev: Option<BucketState>, params: &BucketParams) -> Transition {
    let capacity = params.capacity as f64;
    let rate = params.refill_rate as f64;
    let requested = params.requested as f64;

    let mut state = prev.unwrap_or_else(|| BucketState::full(params.capacity, params.now));

    let elapsed = params.now.saturating_sub(state.last_refill_at).max(0) as f64;
    state.tokens = (state.tokens + elapsed * rate).min(capacity).max(0.0);
    state.last_refill_at = state.last_refill_at.max(params.now);

    let (allowed, retry_after) = if state.tokens >= requested {
        state.tokens -= requested;
        (true, RetryAfter::Immediately)
    } else if params.refill_rate == 0 {
        (false, RetryAfter::Never)
    } else {
        let wait_ms = ((requested - state.tokens) / rate * 1000.0).ceil();
        // float-to-int casts saturate
        (false, RetryAfter::Millis(wait_ms as u64))
    };

    let remaining = (state.tokens.floor().max(0.0) as u64).min(params.capacity);

    let full_at = if params.refill_rate == 0 {
        None
    } else {
        let secs_to_full = ((capacity - state.tokens).max(0.0) / rate).ceil() as i64;
        Some(state.last_refill_at.saturating_add(secs_to_full))
    };

    Transition {
        state,
        admission: Admission {
            allowed,
            remaining,
            retry_after,
        },
        full_at,
    }
}
