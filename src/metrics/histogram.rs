//! Lock-free latency histogram for percentile tracking and Prometheus export.
//!
//! Logarithmic-ish buckets keep memory fixed while staying accurate in the
//! microsecond range where store round trips live.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use super::LatencyPercentiles;

const NUM_BUCKETS: usize = 64;

/// Latency histogram over microsecond samples.
///
/// Values below 16us get one bucket each. Above that every power of two is
/// split into four sub-buckets, up to 64ms; bucket 63 also absorbs
/// everything larger.
pub struct LatencyHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record a latency in microseconds.
    #[inline]
    pub fn record(&self, value_us: u64) {
        self.buckets[Self::value_to_bucket(value_us)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);
    }

    #[inline]
    fn value_to_bucket(value_us: u64) -> usize {
        if value_us < 16 {
            return value_us as usize;
        }
        let exp = 63 - value_us.leading_zeros() as usize;
        let sub = ((value_us >> (exp - 2)) & 3) as usize;
        (16 + (exp - 4) * 4 + sub).min(NUM_BUCKETS - 1)
    }

    /// Smallest value that lands in `bucket`.
    #[inline]
    fn bucket_lower(bucket: usize) -> u64 {
        if bucket < 16 {
            return bucket as u64;
        }
        let exp = 4 + (bucket - 16) / 4;
        let sub = ((bucket - 16) % 4) as u64;
        (4 + sub) << (exp - 2)
    }

    /// Exclusive upper bound of `bucket`, `None` for the overflow bucket.
    #[inline]
    fn bucket_upper(bucket: usize) -> Option<u64> {
        (bucket + 1 < NUM_BUCKETS).then(|| Self::bucket_lower(bucket + 1))
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Calculate p50, p95, p99 percentiles.
    pub fn percentiles(&self) -> LatencyPercentiles {
        let total = self.count();
        if total == 0 {
            return LatencyPercentiles::default();
        }

        let targets = [
            (total / 2).max(1),
            (total * 95 / 100).max(1),
            (total * 99 / 100).max(1),
        ];
        let mut found = [None; 3];
        let mut cumulative = 0u64;

        for (idx, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            for (slot, target) in found.iter_mut().zip(targets) {
                if slot.is_none() && cumulative >= target {
                    *slot = Some(Self::bucket_lower(idx));
                }
            }
        }

        let [p50, p95, p99] = found.map(|v| v.unwrap_or(0));
        LatencyPercentiles {
            count: total,
            p50,
            p95,
            p99,
            max: self.max.load(Ordering::Relaxed),
        }
    }

    /// Append this histogram in Prometheus text format, in seconds.
    ///
    /// Every eighth boundary is emitted to keep the series count small.
    pub fn write_prometheus(&self, out: &mut String, name: &str, labels: &str) {
        let sep = if labels.is_empty() { "" } else { "," };
        let mut cumulative = 0u64;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            let Some(upper) = Self::bucket_upper(idx) else {
                continue;
            };
            if (idx + 1) % 8 == 0 {
                let le = upper as f64 / 1_000_000.0;
                let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"{le}\"}} {cumulative}");
            }
        }
        let count = self.count();
        let sum = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"+Inf\"}} {count}");
        let _ = writeln!(out, "{name}_sum{{{labels}}} {sum}");
        let _ = writeln!(out, "{name}_count{{{labels}}} {count}");
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
