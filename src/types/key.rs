use bytes::Bytes;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Store key.
///
/// Wraps `Bytes`, so clones share the buffer and keys parsed off the wire
/// reference the read buffer directly. Keys built by [`bucket_key`] and
/// [`rule_key`] are always valid UTF-8; keys arriving over RESP need not be.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Bytes);

impl Key {
    #[inline]
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    #[inline]
    pub fn from_static(s: &'static [u8]) -> Self {
        Self(Bytes::from_static(s))
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// FxHash of the key bytes, used to pick a shard.
    ///
    /// Must stay stable for the life of a process: a key that moved shards
    /// would lose its bucket.
    #[inline]
    pub fn shard_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.0.hash(&mut hasher);
        hasher.finish()
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, quoted: bool) -> fmt::Result {
        match (std::str::from_utf8(&self.0), quoted) {
            (Ok(s), true) => write!(f, "{:?}", s),
            (Ok(s), false) => f.write_str(s),
            (Err(_), _) => write!(f, "{:?}", self.0),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(")?;
        self.render(f, true)?;
        f.write_str(")")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, false)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Bytes> for Key {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

/// Namespace prefix for bucket state keys.
pub const BUCKET_PREFIX: &str = "rl";

/// Namespace prefix for rule records.
pub const RULE_PREFIX: &str = "rule";

/// Maximum length in bytes of one identity component.
pub const MAX_COMPONENT_LEN: usize = 256;

const DELIMITER: u8 = b':';
const ESCAPE: u8 = b'\\';

/// Build the bucket state key `rl:{tenant}:{resource}:{subject}`.
///
/// Components are escaped so the mapping is injective: distinct
/// (tenant, resource, subject) triples never produce the same key, and
/// components without `:` or `\` render verbatim.
pub fn bucket_key(tenant: &str, resource: &str, subject: &str) -> Result<Key> {
    check_identity(tenant, resource)?;
    check_component("key", subject)?;
    Ok(join(BUCKET_PREFIX, &[tenant, resource, subject]))
}

/// Build the rule record key `rule:{tenant}:{resource}`.
pub fn rule_key(tenant: &str, resource: &str) -> Result<Key> {
    check_identity(tenant, resource)?;
    Ok(join(RULE_PREFIX, &[tenant, resource]))
}

/// Recover `(tenant, resource)` from a key built by [`rule_key`].
pub fn parse_rule_key(key: &[u8]) -> Result<(String, String)> {
    let parts = split_escaped(key)?;
    match parts.as_slice() {
        [prefix, tenant, resource] if prefix.as_slice() == RULE_PREFIX.as_bytes() => {
            let tenant = String::from_utf8(tenant.clone())
                .map_err(|_| Error::store("rule key is not utf8"))?;
            let resource = String::from_utf8(resource.clone())
                .map_err(|_| Error::store("rule key is not utf8"))?;
            Ok((tenant, resource))
        }
        _ => Err(Error::store(format!(
            "malformed rule key: {}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Validate the tenant/resource pair shared by bucket and rule keys.
pub fn check_identity(tenant: &str, resource: &str) -> Result<()> {
    if tenant.is_empty() {
        return Err(Error::validation("tenant_id is required"));
    }
    if resource.is_empty() {
        return Err(Error::validation("resource is required"));
    }
    check_component("tenant_id", tenant)?;
    check_component("resource", resource)
}

fn check_component(name: &str, value: &str) -> Result<()> {
    if value.len() > MAX_COMPONENT_LEN {
        return Err(Error::validation(format!(
            "{} exceeds {} bytes",
            name, MAX_COMPONENT_LEN
        )));
    }
    if value.bytes().any(|b| b.is_ascii_control()) {
        return Err(Error::validation(format!(
            "{} contains control characters",
            name
        )));
    }
    Ok(())
}

fn join(prefix: &str, components: &[&str]) -> Key {
    let len = prefix.len() + components.iter().map(|c| c.len() + 1).sum::<usize>();
    let mut out = Vec::with_capacity(len + 8);
    out.extend_from_slice(prefix.as_bytes());
    for component in components {
        out.push(DELIMITER);
        for &b in component.as_bytes() {
            if b == DELIMITER || b == ESCAPE {
                out.push(ESCAPE);
            }
            out.push(b);
        }
    }
    Key(Bytes::from(out))
}

fn split_escaped(key: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut parts = Vec::new();
    let mut current = Vec::new();
    let mut bytes = key.iter();
    while let Some(&b) = bytes.next() {
        match b {
            ESCAPE => match bytes.next() {
                Some(&next) => current.push(next),
                None => return Err(Error::store("dangling escape in key")),
            },
            DELIMITER => parts.push(std::mem::take(&mut current)),
            _ => current.push(b),
        }
    }
    parts.push(current);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_debug() {
        let key = Key::from("rl:acme:/a:u1");
        assert_eq!(key.to_string(), "rl:acme:/a:u1");
        assert_eq!(format!("{:?}", key), "Key(\"rl:acme:/a:u1\")");

        let raw = Key::new(Bytes::from_static(&[0xff, 0x00]));
        assert!(format!("{}", raw).starts_with("b\""));
    }

    #[test]
    fn test_shard_hash_follows_bytes() {
        let a = Key::from("rl:t:r:s");
        let b = Key::new(Bytes::from(String::from("rl:t:r:s")));
        assert_eq!(a, b);
        assert_eq!(a.shard_hash(), b.shard_hash());
        assert_ne!(a.shard_hash(), Key::from("rl:t:r:z").shard_hash());
    }

    #[test]
    fn test_bucket_key_layout() {
        let key = bucket_key("payments", "/charge", "user1").unwrap();
        assert_eq!(key.as_bytes(), b"rl:payments:/charge:user1");
    }

    #[test]
    fn test_bucket_key_empty_subject() {
        let key = bucket_key("payments", "/charge", "").unwrap();
        assert_eq!(key.as_bytes(), b"rl:payments:/charge:");
    }

    #[test]
    fn test_bucket_key_deterministic() {
        let a = bucket_key("t", "r", "s").unwrap();
        let b = bucket_key("t", "r", "s").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shard_hash(), b.shard_hash());
    }

    #[test]
    fn test_bucket_key_delimiter_does_not_collide() {
        // Without escaping both would render as rl:a:b:c:
        let a = bucket_key("a:b", "c", "").unwrap();
        let b = bucket_key("a", "b:c", "").unwrap();
        let c = bucket_key("a", "b", "c:").unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(a.as_bytes(), b"rl:a\\:b:c:");
    }

    #[test]
    fn test_bucket_key_escape_does_not_collide() {
        let a = bucket_key("a\\", "b", "").unwrap();
        let b = bucket_key("a", "\\b", "").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucket_key_rejects_missing_identity() {
        assert!(matches!(bucket_key("", "r", "s"), Err(Error::Validation(_))));
        assert!(matches!(bucket_key("t", "", "s"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_bucket_key_rejects_control_and_oversized() {
        assert!(matches!(bucket_key("t\n", "r", ""), Err(Error::Validation(_))));
        let long = "x".repeat(MAX_COMPONENT_LEN + 1);
        assert!(matches!(bucket_key("t", "r", &long), Err(Error::Validation(_))));
    }

    #[test]
    fn test_rule_key_round_trip_with_delimiters() {
        let key = rule_key("acme:eu", "/v1:search").unwrap();
        let (tenant, resource) = parse_rule_key(key.as_bytes()).unwrap();
        assert_eq!(tenant, "acme:eu");
        assert_eq!(resource, "/v1:search");
    }

    #[test]
    fn test_rule_key_layout() {
        let key = rule_key("payments", "/charge").unwrap();
        assert_eq!(key.as_bytes(), b"rule:payments:/charge");
    }

    #[test]
    fn test_parse_rule_key_rejects_foreign_keys() {
        assert!(parse_rule_key(b"rl:a:b:c").is_err());
        assert!(parse_rule_key(b"rule:onlytenant").is_err());
        assert!(parse_rule_key(b"rule:a:b\\").is_err());
    }
}
