use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::registry::{Rule, RuleRegistry};

/// Process-local registry, for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    rules: RwLock<BTreeMap<(String, String), Rule>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRegistry for MemoryRegistry {
    async fn get(&self, tenant: &str, resource: &str) -> Result<Option<Rule>> {
        let key = (tenant.to_string(), resource.to_string());
        Ok(self.rules.read().get(&key).cloned())
    }

    async fn add(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        let key = (rule.tenant_id.clone(), rule.resource.clone());
        self.rules.write().insert(key, rule);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.read().values().cloned().collect())
    }

    async fn delete(&self, tenant: &str, resource: &str) -> Result<bool> {
        let key = (tenant.to_string(), resource.to_string());
        Ok(self.rules.write().remove(&key).is_some())
    }
}
