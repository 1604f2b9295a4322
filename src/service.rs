//! Admission flow shared by every transport.
//!
//! A check validates the request, derives the bucket key, looks up the rule
//! for (tenant, resource), reads the clock once and runs a single atomic
//! transition through the [`Limiter`]. Nothing is cached between checks, so
//! a rule change is seen by the next request.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::Admission;
use crate::error::{Error, ErrorKind, Result};
use crate::limiter::{Clock, Limiter};
use crate::metrics::Metrics;
use crate::registry::{Rule, RuleRegistry};
use crate::types::{bucket_key, check_identity};

/// One admission question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRequest {
    #[serde(alias = "tennant_id")]
    pub tenant_id: String,
    pub resource: String,
    /// Subject within the tenant; empty means the whole (tenant, resource)
    #[serde(default)]
    pub key: String,
    pub tokens_requested: i64,
}

/// Decision plus the capacity of the rule it was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub admission: Admission,
    pub limit: u64,
}

pub struct AdmissionService {
    limiter: Limiter,
    registry: Arc<dyn RuleRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl AdmissionService {
    pub fn new(
        limiter: Limiter,
        registry: Arc<dyn RuleRegistry>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            limiter,
            registry,
            clock,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Decide one request.
    ///
    /// Any error is a refusal: the caller must not perform the work.
    pub async fn check(&self, req: CheckRequest) -> Result<CheckOutcome> {
        let start = Instant::now();
        let result = self.check_inner(&req, start).await;
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    async fn check_inner(&self, req: &CheckRequest, start: Instant) -> Result<CheckOutcome> {
        let key = bucket_key(&req.tenant_id, &req.resource, &req.key)?;

        let rule = self
            .registry
            .get(&req.tenant_id, &req.resource)
            .await?
            .ok_or_else(|| Error::PolicyNotFound {
                tenant: req.tenant_id.clone(),
                resource: req.resource.clone(),
            })?;

        let now = self.clock.now_secs();
        let admission = self
            .limiter
            .allow(
                &key,
                now,
                rule.refill_rate as i64,
                rule.capacity as i64,
                req.tokens_requested,
            )
            .await?;

        self.metrics
            .record_check(&req.tenant_id, &req.resource, admission.allowed, start);

        Ok(CheckOutcome {
            admission,
            limit: rule.capacity,
        })
    }

    fn record_error(&self, e: &Error) {
        match e.kind() {
            ErrorKind::Validation => {
                debug!("Rejected check: {}", e);
                self.metrics.inc(&self.metrics.validation_errors);
            }
            ErrorKind::NotFound => {
                debug!("{}", e);
                self.metrics.inc(&self.metrics.policy_misses);
            }
            ErrorKind::Store => {
                warn!("Check failed closed: {}", e);
                self.metrics.inc(&self.metrics.errors_total);
            }
        }
    }

    pub async fn add_rule(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        self.registry.add(rule).await
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.registry.list().await
    }

    /// Remove a rule. Existing buckets are left to expire on their own.
    pub async fn delete_rule(&self, tenant: &str, resource: &str) -> Result<bool> {
        check_identity(tenant, resource)?;
        self.registry.delete(tenant, resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BucketParams, RetryAfter, ShardedDb};
    use crate::limiter::ManualClock;
    use crate::registry::{MemoryRegistry, StoreRegistry};
    use crate::store::BucketStore;
    use crate::types::Key;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct Fixture {
        service: AdmissionService,
        clock: Arc<ManualClock>,
        metrics: Arc<Metrics>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(ShardedDb::with_shards(8, None));
        let clock = Arc::new(ManualClock::new(1_000));
        let metrics = Arc::new(Metrics::new());
        let service = AdmissionService::new(
            Limiter::new(db.clone()),
            Arc::new(StoreRegistry::new(db)),
            clock.clone(),
            metrics.clone(),
        );
        Fixture {
            service,
            clock,
            metrics,
        }
    }

    fn request(key: &str, tokens: i64) -> CheckRequest {
        CheckRequest {
            tenant_id: "acme".into(),
            resource: "/search".into(),
            key: key.into(),
            tokens_requested: tokens,
        }
    }

    fn rule(capacity: u64, refill_rate: u64) -> Rule {
        Rule {
            tenant_id: "acme".into(),
            resource: "/search".into(),
            capacity,
            refill_rate,
        }
    }

    #[tokio::test]
    async fn test_check_without_rule_is_not_found() {
        let f = fixture();
        let err = f.service.check(request("u1", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.metrics.get(&f.metrics.policy_misses), 1);
        assert_eq!(f.metrics.get(&f.metrics.errors_total), 0);
    }

    #[tokio::test]
    async fn test_check_consumes_and_refills() {
        let f = fixture();
        f.service.add_rule(rule(2, 1)).await.unwrap();

        let first = f.service.check(request("u1", 1)).await.unwrap();
        assert_eq!(first.limit, 2);
        assert!(first.admission.allowed);
        assert_eq!(first.admission.remaining, 1);

        assert!(f.service.check(request("u1", 1)).await.unwrap().admission.allowed);
        let denied = f.service.check(request("u1", 1)).await.unwrap();
        assert!(!denied.admission.allowed);
        assert_eq!(denied.admission.retry_after, RetryAfter::Millis(1000));

        f.clock.advance(1);
        assert!(f.service.check(request("u1", 1)).await.unwrap().admission.allowed);

        let policy = f.metrics.policy("acme", "/search");
        assert_eq!(policy.requests.load(Ordering::Relaxed), 4);
        assert_eq!(policy.blocked.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_rule_change_applies_to_next_check() {
        let f = fixture();
        f.service.add_rule(rule(1, 0)).await.unwrap();
        assert!(f.service.check(request("", 1)).await.unwrap().admission.allowed);
        assert!(!f.service.check(request("", 1)).await.unwrap().admission.allowed);

        f.service.add_rule(rule(5, 0)).await.unwrap();
        let outcome = f.service.check(request("", 0)).await.unwrap();
        assert_eq!(outcome.limit, 5);
        assert_eq!(outcome.admission.remaining, 0);
    }

    #[tokio::test]
    async fn test_invalid_requests_never_touch_the_registry() {
        let f = fixture();
        f.service.add_rule(rule(1, 0)).await.unwrap();

        let mut req = request("u1", 1);
        req.tenant_id.clear();
        assert_eq!(
            f.service.check(req).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            f.service.check(request("u1", -1)).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(f.metrics.get(&f.metrics.validation_errors), 2);
    }

    struct DownStore;

    #[async_trait]
    impl BucketStore for DownStore {
        async fn token_bucket(&self, _key: &Key, _params: BucketParams) -> Result<Admission> {
            Err(Error::store("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let registry = Arc::new(MemoryRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let service = AdmissionService::new(
            Limiter::new(Arc::new(DownStore)),
            registry,
            Arc::new(ManualClock::new(0)),
            metrics.clone(),
        );
        service.add_rule(rule(10, 1)).await.unwrap();

        let err = service.check(request("u1", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(metrics.get(&metrics.errors_total), 1);
    }

    #[tokio::test]
    async fn test_delete_rule() {
        let f = fixture();
        f.service.add_rule(rule(1, 0)).await.unwrap();
        assert_eq!(f.service.list_rules().await.unwrap(), vec![rule(1, 0)]);
        assert!(f.service.delete_rule("acme", "/search").await.unwrap());
        assert!(!f.service.delete_rule("acme", "/search").await.unwrap());
        assert_eq!(
            f.service.delete_rule("", "/search").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_request_json() {
        let req: CheckRequest = serde_json::from_str(
            r#"{"tennant_id":"acme","resource":"/search","tokens_requested":2}"#,
        )
        .unwrap();
        assert_eq!(req.tenant_id, "acme");
        assert_eq!(req.key, "");

        assert!(serde_json::from_str::<CheckRequest>(
            r#"{"tenant_id":"acme","resource":"/search"}"#
        )
        .is_err());
    }
}
