use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// Which part of the system this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// In-process state store plus the HTTP admission API
    Standalone,
    /// Shared state store only, serving RESP over TCP
    Store,
    /// Stateless HTTP admission API backed by a remote store
    Api,
}

/// How a standalone process makes bucket transitions atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AtomicMode {
    /// Transition runs under the shard's write lock
    Locked,
    /// Optimistic compare-and-swap retried on conflict. Buckets are never
    /// evicted, so memory grows with the number of distinct subjects
    Cas,
}

/// QuotaGate - multi-tenant token bucket admission control
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Process role
    #[arg(long, value_enum, default_value = "standalone")]
    pub role: Role,

    /// RESP binding address of the state store
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    pub bind: SocketAddr,

    /// HTTP binding address of the admission API
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,

    /// Remote state store address (role = api)
    #[arg(long, default_value = "127.0.0.1:6380")]
    pub store_addr: String,

    /// Deadline for one store round trip in milliseconds
    #[arg(long, default_value = "250")]
    pub store_timeout_ms: u64,

    /// Maximum concurrent connections to the remote store
    #[arg(long, default_value = "64")]
    pub store_pool_size: usize,

    /// Number of shards (power of 2 recommended)
    #[arg(short, long, default_value = "64")]
    pub shards: usize,

    /// Maximum concurrent store client connections
    #[arg(long, default_value = "10000")]
    pub max_connections: usize,

    /// Evict buckets that have refilled to capacity
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub enable_ttl: bool,

    /// TTL check interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub ttl_tick_ms: u64,

    /// Seconds a full bucket is retained before eviction
    #[arg(long, default_value = "60")]
    pub ttl_grace_secs: u64,

    /// Atomicity strategy for the in-process store (role = standalone).
    /// With `cas`, bucket state is never evicted and --enable-ttl has no effect
    #[arg(long, value_enum, default_value = "locked")]
    pub atomic: AtomicMode,

    /// Maximum accepted HTTP request body in bytes
    #[arg(long, default_value = "65536")]
    pub max_body_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Store round trip deadline
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Standalone,
            bind: SocketAddr::from(([127, 0, 0, 1], 6380)),
            http_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store_addr: "127.0.0.1:6380".to_string(),
            store_timeout_ms: 250,
            store_pool_size: 64,
            shards: 64,
            max_connections: 10_000,
            enable_ttl: true,
            ttl_tick_ms: 1000,
            ttl_grace_secs: 60,
            atomic: AtomicMode::Locked,
            max_body_bytes: 64 * 1024,
            log_level: "info".to_string(),
        }
    }
}
