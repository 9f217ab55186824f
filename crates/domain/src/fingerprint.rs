//! Input fingerprinting for duplicate-inflight detection.
//!
//! Inputs are canonicalized before hashing so that semantically equal
//! requests collide: object keys are sorted, strings are trimmed,
//! lowercased, and internal whitespace runs are collapsed to a single
//! space. The canonical JSON text is hashed with SHA-256 and rendered as
//! lowercase hex.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the canonical fingerprint of a JSON input payload.
pub fn fingerprint(inputs: &Value) -> String {
    let canonical = canonicalize(inputs);
    // Maps in serde_json serialize in key order (BTreeMap-backed), so the
    // canonical value renders deterministically.
    let text = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)
}

/// Rebuild a JSON value in canonical form: sorted keys, normalized strings.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn normalize_string(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
