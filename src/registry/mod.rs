//! Rule registry: the (tenant, resource) policy consulted by every check.

mod memory;
mod store;

pub use memory::MemoryRegistry;
pub use store::{StoreRegistry, INDEX_KEY};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limiter::MAX_EXACT;
use crate::types::check_identity;

/// Token bucket policy for one tenant and resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub tenant_id: String,
    pub resource: String,
    /// Maximum tokens in a bucket
    pub capacity: u64,
    /// Tokens added per second, 0 means never
    pub refill_rate: u64,
}

impl Rule {
    /// Check identity components and numeric ranges.
    pub fn validate(&self) -> Result<()> {
        check_identity(&self.tenant_id, &self.resource)?;
        for (name, value) in [("capacity", self.capacity), ("refill_rate", self.refill_rate)] {
            if value > MAX_EXACT as u64 {
                return Err(Error::validation(format!(
                    "{} must be at most {}",
                    name, MAX_EXACT
                )));
            }
        }
        Ok(())
    }
}

/// Storage of rules.
///
/// A lookup that finds nothing returns `Ok(None)`; `Err` always means the
/// registry itself failed.
#[async_trait]
pub trait RuleRegistry: Send + Sync {
    async fn get(&self, tenant: &str, resource: &str) -> Result<Option<Rule>>;

    /// Create or overwrite the rule for its (tenant, resource).
    async fn add(&self, rule: Rule) -> Result<()>;

    /// Every rule, ordered by tenant then resource.
    async fn list(&self) -> Result<Vec<Rule>>;

    /// Remove a rule. Returns whether it existed.
    async fn delete(&self, tenant: &str, resource: &str) -> Result<bool>;
}
