use std::sync::Arc;
use std::time::Duration;

use quota_gate::api::{run_http_server, ApiState};
use quota_gate::config::{AtomicMode, Config, Role};
use quota_gate::engine::ShardedDb;
use quota_gate::limiter::{Clock, Limiter, SystemClock};
use quota_gate::metrics::Metrics;
use quota_gate::registry::{RuleRegistry, StoreRegistry};
use quota_gate::server::Listener;
use quota_gate::service::AdmissionService;
use quota_gate::store::{BucketStore, CasBucketStore, MemoryVersionedStore, RemoteStore};

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = Config::parse_args();

    // Initialize tracing
    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let metrics = Arc::new(Metrics::new());

    info!("QuotaGate v{}", env!("CARGO_PKG_VERSION"));
    info!("Role: {:?}", config.role);

    match config.role {
        Role::Standalone => {
            info!(
                "Configuration: {} shards, atomic={:?}, ttl={}",
                config.shards, config.atomic, config.enable_ttl
            );
            let db = Arc::new(ShardedDb::new(&config));
            spawn_expiry(&config, db.clone());

            let buckets: Arc<dyn BucketStore> = match config.atomic {
                AtomicMode::Locked => db.clone() as Arc<dyn BucketStore>,
                AtomicMode::Cas => {
                    info!("Bucket state held in a compare-and-swap store, not evicted");
                    Arc::new(CasBucketStore::new(MemoryVersionedStore::new()))
                }
            };
            let registry: Arc<dyn RuleRegistry> = Arc::new(StoreRegistry::new(db));
            serve_api(&config, buckets, registry, metrics).await?;
        }
        Role::Store => {
            info!(
                "Configuration: {} shards, max_connections={}, ttl={}",
                config.shards, config.max_connections, config.enable_ttl
            );
            let db = Arc::new(ShardedDb::new(&config));
            spawn_expiry(&config, db.clone());

            let listener = Listener::bind(&config, db, metrics).await?;
            info!("Ready to accept connections");
            listener.run().await?;
        }
        Role::Api => {
            info!(
                "Configuration: store={}, pool={}, timeout={}ms",
                config.store_addr, config.store_pool_size, config.store_timeout_ms
            );
            let store = Arc::new(RemoteStore::from_config(&config));
            let registry: Arc<dyn RuleRegistry> = Arc::new(StoreRegistry::new(store.clone()));
            serve_api(&config, store, registry, metrics).await?;
        }
    }

    Ok(())
}

async fn serve_api(
    config: &Config,
    buckets: Arc<dyn BucketStore>,
    registry: Arc<dyn RuleRegistry>,
    metrics: Arc<Metrics>,
) -> std::io::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = Arc::new(ApiState {
        service: AdmissionService::new(Limiter::new(buckets), registry, clock, metrics),
        max_body_bytes: config.max_body_bytes,
    });
    run_http_server(config.http_bind, state).await
}

/// Periodically evict buckets that have refilled to capacity.
fn spawn_expiry(config: &Config, db: Arc<ShardedDb>) {
    if !config.enable_ttl {
        return;
    }
    let tick_interval = Duration::from_millis(config.ttl_tick_ms);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            let expired = db.expire_all(SystemClock.now_secs());
            if expired > 0 {
                tracing::debug!("Expired {} buckets", expired);
            }
        }
    });
}
