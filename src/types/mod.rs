mod key;

pub use key::{
    bucket_key, check_identity, parse_rule_key, rule_key, Key, BUCKET_PREFIX,
    MAX_COMPONENT_LEN, RULE_PREFIX,
};
