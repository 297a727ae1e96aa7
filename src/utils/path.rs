//! Nested lookup into `serde_json::Value` by path segments.
//!
//! Param references may name a nested position in the resolution context
//! (e.g. `["session", "token"]`). Objects are descended by key; arrays by
//! numeric segment.

use serde_json::Value;

/// Descend `value` along `segments`, returning the nested value if every
/// segment resolves.
pub fn get_in<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
