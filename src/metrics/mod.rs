//! Observability for the admission API and the state store.
//!
//! A single [`Metrics`] value is built at startup and handed to every
//! component as `Arc<Metrics>`. Counters are lock-free atomics; the
//! per-policy table takes a read lock on the hot path and a write lock only
//! the first time a (tenant, resource) pair is seen.

mod histogram;

pub use histogram::LatencyHistogram;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Relaxed ordering for counters (eventual visibility is fine for metrics).
const RELAXED: Ordering = Ordering::Relaxed;

/// Counters for one (tenant, resource) policy.
#[derive(Default)]
pub struct PolicyMetrics {
    pub requests: AtomicU64,
    pub allowed: AtomicU64,
    pub blocked: AtomicU64,
    pub latency: LatencyHistogram,
}

/// Process-wide metrics.
pub struct Metrics {
    started: Instant,

    // Admission API
    policies: RwLock<FxHashMap<(String, String), Arc<PolicyMetrics>>>,
    pub errors_total: AtomicU64,
    pub policy_misses: AtomicU64,
    pub validation_errors: AtomicU64,

    // Store server
    pub commands_total: AtomicU64,
    pub commands_tballow: AtomicU64,
    pub commands_hash: AtomicU64,
    pub commands_set: AtomicU64,
    pub commands_other: AtomicU64,
    pub errors_parse: AtomicU64,
    pub errors_unknown_cmd: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub latency_tballow: LatencyHistogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            policies: RwLock::new(FxHashMap::default()),
            errors_total: AtomicU64::new(0),
            policy_misses: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            commands_total: AtomicU64::new(0),
            commands_tballow: AtomicU64::new(0),
            commands_hash: AtomicU64::new(0),
            commands_set: AtomicU64::new(0),
            commands_other: AtomicU64::new(0),
            errors_parse: AtomicU64::new(0),
            errors_unknown_cmd: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            latency_tballow: LatencyHistogram::new(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, RELAXED);
    }

    #[inline]
    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(RELAXED)
    }

    /// Counters for a policy, created on first use.
    pub fn policy(&self, tenant: &str, resource: &str) -> Arc<PolicyMetrics> {
        let key = (tenant.to_string(), resource.to_string());
        if let Some(m) = self.policies.read().get(&key) {
            return m.clone();
        }
        self.policies.write().entry(key).or_default().clone()
    }

    /// Record a completed admission check.
    pub fn record_check(&self, tenant: &str, resource: &str, allowed: bool, start: Instant) {
        let policy = self.policy(tenant, resource);
        policy.requests.fetch_add(1, RELAXED);
        if allowed {
            policy.allowed.fetch_add(1, RELAXED);
        } else {
            policy.blocked.fetch_add(1, RELAXED);
        }
        policy.latency.record(start.elapsed().as_micros() as u64);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, RELAXED);
        self.connections_active.fetch_add(1, RELAXED);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, RELAXED);
    }

    /// Record one store command with its latency.
    #[inline]
    pub fn record_command(&self, cmd_type: CommandType, start: Instant) {
        self.commands_total.fetch_add(1, RELAXED);
        match cmd_type {
            CommandType::TbAllow => {
                self.commands_tballow.fetch_add(1, RELAXED);
                self.latency_tballow
                    .record(start.elapsed().as_micros() as u64);
            }
            CommandType::Hash => {
                self.commands_hash.fetch_add(1, RELAXED);
            }
            CommandType::Set => {
                self.commands_set.fetch_add(1, RELAXED);
            }
            CommandType::Other => {
                self.commands_other.fetch_add(1, RELAXED);
            }
        }
    }

    /// Render everything in Prometheus text exposition format.
    pub fn to_prometheus_string(&self) -> String {
        let mut out = String::with_capacity(4096);

        let mut policies: Vec<_> = self
            .policies
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        policies.sort_by(|a, b| a.0.cmp(&b.0));

        write_policy_counter(&mut out, &policies, "rate_limit_requests_total",
            "Total number of rate limit checks", |p| &p.requests);
        write_policy_counter(&mut out, &policies, "rate_limit_allowed_total",
            "Total number of allowed requests", |p| &p.allowed);
        write_policy_counter(&mut out, &policies, "rate_limit_blocked_total",
            "Total number of blocked requests", |p| &p.blocked);

        let _ = writeln!(out, "# HELP rate_limit_check_latency_seconds Latency of rate limit checks");
        let _ = writeln!(out, "# TYPE rate_limit_check_latency_seconds histogram");
        for (key, policy) in &policies {
            policy
                .latency
                .write_prometheus(&mut out, "rate_limit_check_latency_seconds", &policy_labels(key));
        }

        for (name, help, value) in [
            ("rate_limit_errors_total", "Total number of internal rate limiter errors", &self.errors_total),
            ("rate_limit_policy_misses_total", "Checks rejected for lack of a rule", &self.policy_misses),
            ("rate_limit_validation_errors_total", "Requests rejected as invalid", &self.validation_errors),
            ("store_commands_total", "Commands processed by the state store", &self.commands_total),
            ("store_connections_active", "Open state store client connections", &self.connections_active),
        ] {
            let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            let _ = writeln!(out, "{name} {}", value.load(RELAXED));
        }

        out
    }

    /// Get a snapshot of the store-side metrics for INFO.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            commands_total: self.commands_total.load(RELAXED),
            commands_tballow: self.commands_tballow.load(RELAXED),
            commands_hash: self.commands_hash.load(RELAXED),
            commands_set: self.commands_set.load(RELAXED),
            commands_other: self.commands_other.load(RELAXED),
            errors_parse: self.errors_parse.load(RELAXED),
            errors_unknown_cmd: self.errors_unknown_cmd.load(RELAXED),
            connections_total: self.connections_total.load(RELAXED),
            connections_active: self.connections_active.load(RELAXED),
            latency_tballow: self.latency_tballow.percentiles(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

type PolicyRows = [((String, String), Arc<PolicyMetrics>)];

fn write_policy_counter(
    out: &mut String,
    policies: &PolicyRows,
    name: &str,
    help: &str,
    pick: fn(&PolicyMetrics) -> &AtomicU64,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for (key, policy) in policies {
        let _ = writeln!(out, "{name}{{{}}} {}", policy_labels(key), pick(policy).load(RELAXED));
    }
}

fn policy_labels((tenant, resource): &(String, String)) -> String {
    format!(
        "tenant=\"{}\",resource=\"{}\"",
        escape_label(tenant),
        escape_label(resource)
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Command type for metrics tracking.
#[derive(Debug, Clone, Copy)]
pub enum CommandType {
    TbAllow,
    Hash,
    Set,
    Other,
}

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyPercentiles {
    pub count: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

/// Point-in-time snapshot of the store metrics.
#[derive(Debug)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub commands_total: u64,
    pub commands_tballow: u64,
    pub commands_hash: u64,
    pub commands_set: u64,
    pub commands_other: u64,
    pub errors_parse: u64,
    pub errors_unknown_cmd: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub latency_tballow: LatencyPercentiles,
}

impl MetricsSnapshot {
    /// Format as Redis INFO-style output. `keys` is the live entry count.
    pub fn to_info_string(&self, section: Option<&str>, keys: usize) -> String {
        let mut out = String::with_capacity(1024);
        let wants = |name: &str| section.map_or(true, |s| s.eq_ignore_ascii_case(name));

        if wants("server") {
            out.push_str("# Server\r\n");
            let _ = write!(out, "quota_gate_version:{}\r\n", env!("CARGO_PKG_VERSION"));
            let _ = write!(out, "uptime_in_seconds:{}\r\n", self.uptime_secs);
            out.push_str("\r\n");
        }

        if wants("clients") {
            out.push_str("# Clients\r\n");
            let _ = write!(out, "connected_clients:{}\r\n", self.connections_active);
            let _ = write!(out, "total_connections_received:{}\r\n", self.connections_total);
            out.push_str("\r\n");
        }

        if wants("stats") {
            out.push_str("# Stats\r\n");
            let _ = write!(out, "total_commands_processed:{}\r\n", self.commands_total);
            let _ = write!(out, "tballow_commands:{}\r\n", self.commands_tballow);
            let _ = write!(out, "hash_commands:{}\r\n", self.commands_hash);
            let _ = write!(out, "set_commands:{}\r\n", self.commands_set);
            let _ = write!(out, "other_commands:{}\r\n", self.commands_other);
            let _ = write!(out, "parse_errors:{}\r\n", self.errors_parse);
            let _ = write!(out, "unknown_command_errors:{}\r\n", self.errors_unknown_cmd);
            out.push_str("\r\n");
        }

        if wants("latency") {
            out.push_str("# Latency (microseconds)\r\n");
            let _ = write!(out, "tballow_p50:{}\r\n", self.latency_tballow.p50);
            let _ = write!(out, "tballow_p95:{}\r\n", self.latency_tballow.p95);
            let _ = write!(out, "tballow_p99:{}\r\n", self.latency_tballow.p99);
            let _ = write!(out, "tballow_max:{}\r\n", self.latency_tballow.max);
            out.push_str("\r\n");
        }

        if wants("keyspace") {
            out.push_str("# Keyspace\r\n");
            let _ = write!(out, "keys:{}\r\n", keys);
            out.push_str("\r\n");
        }

        out
    }
}
