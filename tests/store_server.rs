//! End-to-end tests of the RESP state store through `RemoteStore`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quota_gate::config::Config;
use quota_gate::engine::ShardedDb;
use quota_gate::error::{Error, ErrorKind};
use quota_gate::limiter::Limiter;
use quota_gate::metrics::Metrics;
use quota_gate::registry::{Rule, RuleRegistry, StoreRegistry};
use quota_gate::server::Listener;
use quota_gate::store::{RecordStore, RemoteStore};
use quota_gate::types::{bucket_key, Key};

async fn start_store() -> (SocketAddr, Arc<ShardedDb>) {
    let config = Config {
        bind: "127.0.0.1:0".parse().unwrap(),
        shards: 8,
        ..Default::default()
    };
    let db = Arc::new(ShardedDb::new(&config));
    let listener = Listener::bind(&config, db.clone(), Arc::new(Metrics::new()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { listener.run().await });
    (addr, db)
}

fn client(addr: SocketAddr, pool_size: usize) -> Arc<RemoteStore> {
    Arc::new(RemoteStore::new(
        addr.to_string(),
        pool_size,
        Duration::from_secs(5),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_admit_exactly_capacity() {
    let (addr, _db) = start_store().await;
    let key = bucket_key("acme", "/charge", "card-1").unwrap();

    // Several independent "API instances", each with its own pool.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Limiter::new(client(addr, 8));
        for _ in 0..25 {
            let limiter = limiter.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                limiter.allow(&key, 1_000, 0, 30, 1).await.unwrap().allowed
            }));
        }
    }

    let mut allowed = 0;
    for h in handles {
        if h.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 30);
}

#[tokio::test]
async fn remote_and_local_views_agree() {
    let (addr, db) = start_store().await;
    let store = client(addr, 2);
    let limiter = Limiter::new(store.clone());
    let key = bucket_key("acme", "/search", "u1").unwrap();

    for expected in [2, 1, 0] {
        let a = limiter.allow(&key, 50, 0, 3, 1).await.unwrap();
        assert!(a.allowed);
        assert_eq!(a.remaining, expected);
    }
    let denied = limiter.allow(&key, 50, 0, 3, 1).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_ms(), -1);
    // Sequential calls reuse one pooled connection.
    assert_eq!(store.idle_connections(), 1);

    let state = db.bucket(&key).unwrap().unwrap();
    assert_eq!(state.tokens, 0.0);
    assert_eq!(state.last_refill_at, 50);
}

#[tokio::test]
async fn registry_over_remote_store() {
    let (addr, _db) = start_store().await;
    let registry = StoreRegistry::new(client(addr, 2));

    let rule = Rule {
        tenant_id: "acme".into(),
        resource: "/v1:orders".into(),
        capacity: 100,
        refill_rate: 5,
    };
    registry.add(rule.clone()).await.unwrap();

    assert_eq!(
        registry.get("acme", "/v1:orders").await.unwrap(),
        Some(rule.clone())
    );
    assert_eq!(registry.list().await.unwrap(), vec![rule]);
    assert!(registry.delete("acme", "/v1:orders").await.unwrap());
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_type_is_reported() {
    let (addr, _db) = start_store().await;
    let store = client(addr, 1);
    let key = Key::from("rl:acme:/search:u1");

    store.sadd(&key, "member".into()).await.unwrap();
    let err = Limiter::new(store.clone())
        .allow(&key, 1, 1, 1, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WrongType));
    assert_eq!(err.kind(), ErrorKind::Store);

    // The connection stays usable after an error reply.
    store.ping().await.unwrap();
}
