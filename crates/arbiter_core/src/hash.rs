//! Canonical input hashing for deduplication and replay.
//!
//! The hash must be stable across argument-map insertion order, so keys are
//! sorted before hashing and values are serialized in canonical JSON.

use crate::call::Arguments;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Blake3 hash of a call's tool name and canonicalized arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputHash(String);

impl InputHash {
    /// Compute the hash for a tool name and argument map
    #[must_use]
    pub fn compute(tool_name: &str, args: &Arguments) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(b"\0");

        let mut keys: Vec<&String> = args.keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(canonical_json(&args[key]).as_bytes());
            hasher.update(b"\0");
        }

        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Hex-encoded digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InputHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialize a JSON value with object keys sorted at every level
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args_from(value: Value) -> Arguments {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_hash_stable_across_insertion_order() {
        let mut a = Arguments::new();
        a.insert("x".to_string(), json!(1));
        a.insert("y".to_string(), json!(2));

        let mut b = Arguments::new();
        b.insert("y".to_string(), json!(2));
        b.insert("x".to_string(), json!(1));

        assert_eq!(InputHash::compute("tool", &a), InputHash::compute("tool", &b));
    }

    #[test]
    fn test_hash_differs_by_tool_name() {
        let args = args_from(json!({"x": 1}));
        assert_ne!(
            InputHash::compute("alpha", &args),
            InputHash::compute("beta", &args)
        );
    }

    #[test]
    fn test_hash_differs_by_value() {
        let a = args_from(json!({"x": 1}));
        let b = args_from(json!({"x": 2}));
        assert_ne!(InputHash::compute("t", &a), InputHash::compute("t", &b));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"d": 1, "c": 2}, "a": 3});
        assert_eq!(canonical_json(&v), "{\"a\":3,\"b\":{\"c\":2,\"d\":1}}");
    }

    #[test]
    fn test_hash_is_hex() {
        let hash = InputHash::compute("t", &Arguments::new());
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
