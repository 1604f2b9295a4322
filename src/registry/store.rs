use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::{Rule, RuleRegistry};
use crate::store::RecordStore;
use crate::types::{parse_rule_key, rule_key, Key};

/// Set holding the key of every rule record.
///
/// Rule keys always carry two components after the prefix, so this single
/// component key cannot collide with one.
pub const INDEX_KEY: &str = "rule:index";

const FIELD_CAPACITY: &[u8] = b"capacity";
const FIELD_REFILL_RATE: &[u8] = b"refill_rate";

/// Registry persisted in a [`RecordStore`].
///
/// Each rule is a hash under `rule:{tenant}:{resource}` with the fields
/// `capacity` and `refill_rate`; [`INDEX_KEY`] lists them all. Without
/// multi-key transactions the two can briefly disagree, so writes are
/// ordered to keep one invariant once writers finish: every rule hash is
/// indexed. `add` indexes, writes the hash, then indexes again; `delete`
/// unindexes before deleting. A stale index member (crash mid-write, or a
/// delete racing an add) is skipped by `list`.
pub struct StoreRegistry<S: ?Sized> {
    store: Arc<S>,
    index: Key,
}

impl<S: RecordStore + ?Sized> StoreRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            index: Key::from_static(INDEX_KEY.as_bytes()),
        }
    }

    fn decode(tenant: &str, resource: &str, fields: Vec<(Bytes, Bytes)>) -> Result<Option<Rule>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &[u8]| -> Result<u64> {
            let (_, raw) = fields
                .iter()
                .find(|(f, _)| f.as_ref() == name)
                .ok_or_else(|| {
                    Error::store(format!(
                        "rule {}/{} lacks field {}",
                        tenant,
                        resource,
                        String::from_utf8_lossy(name)
                    ))
                })?;
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    Error::store(format!(
                        "rule {}/{} has undecodable {}: {:?}",
                        tenant,
                        resource,
                        String::from_utf8_lossy(name),
                        raw
                    ))
                })
        };

        Ok(Some(Rule {
            tenant_id: tenant.to_string(),
            resource: resource.to_string(),
            capacity: field(FIELD_CAPACITY)?,
            refill_rate: field(FIELD_REFILL_RATE)?,
        }))
    }
}

fn encode_u64(value: u64) -> Bytes {
    let mut buf = itoa::Buffer::new();
    Bytes::copy_from_slice(buf.format(value).as_bytes())
}

#[async_trait]
impl<S: RecordStore + ?Sized> RuleRegistry for StoreRegistry<S> {
    async fn get(&self, tenant: &str, resource: &str) -> Result<Option<Rule>> {
        let key = rule_key(tenant, resource)?;
        let fields = self.store.hgetall(&key).await?;
        Self::decode(tenant, resource, fields)
    }

    async fn add(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        let key = rule_key(&rule.tenant_id, &rule.resource)?;
        let member = key.clone().into_bytes();

        self.store.sadd(&self.index, member.clone()).await?;
        self.store
            .hset(
                &key,
                vec![
                    (Bytes::from_static(FIELD_CAPACITY), encode_u64(rule.capacity)),
                    (Bytes::from_static(FIELD_REFILL_RATE), encode_u64(rule.refill_rate)),
                ],
            )
            .await?;
        self.store.sadd(&self.index, member).await
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let members = self.store.smembers(&self.index).await?;
        let mut rules = Vec::with_capacity(members.len());

        for member in members {
            let (tenant, resource) = parse_rule_key(&member)?;
            match self.get(&tenant, &resource).await? {
                Some(rule) => rules.push(rule),
                None => debug!("Skipping dangling rule index member {}/{}", tenant, resource),
            }
        }

        rules.sort_by(|a, b| {
            (&a.tenant_id, &a.resource).cmp(&(&b.tenant_id, &b.resource))
        });
        Ok(rules)
    }

    async fn delete(&self, tenant: &str, resource: &str) -> Result<bool> {
        let key = rule_key(tenant, resource)?;
        self.store
            .srem(&self.index, key.clone().into_bytes())
            .await?;
        self.store.del(&key).await
    }
}
