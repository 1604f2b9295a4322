use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

use quota_gate::config::Config;
use quota_gate::engine::{transition, BucketParams, BucketState, ShardedDb};
use quota_gate::types::{bucket_key, Key};

fn params(now: i64) -> BucketParams {
    BucketParams {
        now,
        refill_rate: 10,
        capacity: 100,
        requested: 1,
    }
}

/// Benchmark the pure transition
fn bench_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition");
    group.throughput(Throughput::Elements(1));

    group.bench_function("first_access", |b| {
        let p = params(1_000);
        b.iter(|| black_box(transition(None, black_box(&p))));
    });

    group.bench_function("existing_bucket", |b| {
        let p = params(1_005);
        let prev = Some(BucketState {
            tokens: 3.0,
            last_refill_at: 1_000,
        });
        b.iter(|| black_box(transition(black_box(prev), &p)));
    });

    group.finish();
}

/// Benchmark single-threaded admission checks against the sharded store
fn bench_token_bucket(c: &mut Criterion) {
    let config = Config {
        shards: 16,
        ..Default::default()
    };
    let db = ShardedDb::new(&config);

    let mut group = c.benchmark_group("token_bucket");
    group.throughput(Throughput::Elements(1));

    group.bench_function("same_key", |b| {
        let key = Key::from("rl:acme:/search:u1");
        let mut now = 0i64;
        b.iter(|| {
            now += 1;
            black_box(db.token_bucket(key.clone(), &params(now)))
        })
    });

    group.bench_function("unique_keys", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Key::from(format!("rl:acme:/search:{}", i));
            i = i.wrapping_add(1);
            black_box(db.token_bucket(key, &params(1_000)))
        })
    });

    group.finish();
}

/// Benchmark concurrent admission checks
fn bench_concurrent_token_bucket(c: &mut Criterion) {
    let config = Config {
        shards: 16,
        ..Default::default()
    };
    let db = Arc::new(ShardedDb::new(&config));

    let mut group = c.benchmark_group("concurrent_token_bucket");
    group.throughput(Throughput::Elements(4000));

    // Same subject contention
    group.bench_function("contended_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let db = db.clone();
                    std::thread::spawn(move || {
                        let key = Key::from("rl:acme:/search:hot");
                        for _ in 0..1000 {
                            black_box(db.token_bucket(key.clone(), &params(1_000)));
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    // Different subjects (no contention)
    group.bench_function("uncontended_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|thread_id| {
                    let db = db.clone();
                    std::thread::spawn(move || {
                        for i in 0..1000 {
                            let key = Key::from(format!("rl:acme:/search:{}:{}", thread_id, i));
                            black_box(db.token_bucket(key, &params(1_000)));
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

/// Benchmark key derivation with and without escaping
fn bench_bucket_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_key");
    group.throughput(Throughput::Elements(1));

    group.bench_function("plain", |b| {
        b.iter(|| black_box(bucket_key(black_box("acme"), "/search", "user-42")))
    });

    group.bench_function("escaped", |b| {
        b.iter(|| black_box(bucket_key(black_box("ac:me"), "/a:b\\c", "urn:user:42")))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_transition,
    bench_token_bucket,
    bench_concurrent_token_bucket,
    bench_bucket_key,
);
criterion_main!(benches);
