//! Deterministic fingerprinting of JSON values.
//!
//! Cache keys embed a digest of the lookup-param projection, so the digest
//! must be stable under map-key reordering: two semantically equal
//! projections have to produce the same cache key no matter how the caller
//! assembled them. Values are rendered to a canonical textual form (object
//! keys sorted, arrays in order) and hashed with SHA-256, truncated to
//! 128 bits / 32 hex characters.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// 32-hex-char digest of `value`'s canonical form.
pub fn fingerprint(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's escaping keeps the form unambiguous vs. bare tokens
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}
