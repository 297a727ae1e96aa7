//! Cache key derivation and rendering.
//!
//! Every backend shares the same keying discipline: a key is either
//! `[cache_id, params_projection]` derived from a spec, or an explicit
//! custom key supplied by the caller. Rendering differs per medium - flat
//! string for in-memory and remote KV stores, sharded relative path for the
//! filesystem store - but equality is always on content.

use crate::fingerprint::fingerprint;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    /// Derived from a spec: its cache id plus the lookup-param projection
    /// (`None` when the projection is empty).
    Spec {
        id: String,
        params: Option<Value>,
    },
    /// Explicit key segments supplied by a caller.
    Custom(Vec<String>),
}

impl CacheKey {
    pub fn spec(id: impl Into<String>, params: Option<Value>) -> Self {
        CacheKey::Spec {
            id: id.into(),
            params,
        }
    }

    pub fn custom<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheKey::Custom(segments.into_iter().map(Into::into).collect())
    }

    /// Flat rendering with `/` separators, used by the memory and remote KV
    /// backends.
    pub fn render(&self) -> String {
        match self {
            CacheKey::Spec { id, params: None } => id.clone(),
            CacheKey::Spec {
                id,
                params: Some(p),
            } => format!("{}/{}", id, fingerprint(p)),
            CacheKey::Custom(segments) => segments.join("/"),
        }
    }

    /// Relative path rendering for the filesystem backend.
    ///
    /// Spec keys: `<id with '/'→'.'>/<first-2-hex>/<remaining-30-hex>.json`,
    /// the hex being the fingerprint of the projection. Custom keys render
    /// literally, the last segment sharded by its first two characters when
    /// longer than two.
    pub fn fs_path(&self) -> PathBuf {
        match self {
            CacheKey::Spec { id, params } => {
                let fp = fingerprint(params.as_ref().unwrap_or(&Value::Null));
                let mut path = PathBuf::from(id.replace('/', "."));
                path.push(&fp[..2]);
                path.push(format!("{}.json", &fp[2..]));
                path
            }
            CacheKey::Custom(segments) => {
                let mut path = PathBuf::new();
                for segment in segments.iter().take(segments.len().saturating_sub(1)) {
                    path.push(segment.replace('/', "."));
                }
                match segments.last() {
                    Some(last) if last.len() > 2 && last.is_char_boundary(2) => {
                        path.push(&last[..2]);
                        path.push(format!("{}.json", &last[2..]));
                    }
                    Some(last) => {
                        path.push(format!("{}.json", last));
                    }
                    None => {
                        path.push("key.json");
                    }
                }
                path
            }
        }
    }

    /// JSON form, used as the `key` field of backend metadata and in
    /// `cache-status` of the final outcome.
    pub fn to_value(&self) -> Value {
        match self {
            CacheKey::Spec { id, params } => {
                json!([id, params.clone().unwrap_or(Value::Null)])
            }
            CacheKey::Custom(segments) => json!(segments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_key_without_params_renders_to_id() {
        let key = CacheKey::spec("orders/fetch", None);
        assert_eq!(key.render(), "orders/fetch");
    }

    #[test]
    fn spec_key_with_params_appends_fingerprint() {
        let key = CacheKey::spec("orders/fetch", Some(json!({"id": 42})));
        let rendered = key.render();
        assert!(rendered.starts_with("orders/fetch/"));
        assert_eq!(rendered.len(), "orders/fetch/".len() + 32);
    }

    #[test]
    fn equal_projections_equal_keys() {
        let a: Value = serde_json::from_str(r#"{"id": 42, "region": "eu"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"region": "eu", "id": 42}"#).unwrap();
        assert_eq!(
            CacheKey::spec("k", Some(a)).render(),
            CacheKey::spec("k", Some(b)).render()
        );
    }

    #[test]
    fn fs_path_shards_on_first_two_hex() {
        let key = CacheKey::spec("orders/fetch", Some(json!({"id": 42})));
        let path = key.fs_path();
        let parts: Vec<_> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        assert_eq!(parts[0], "orders.fetch");
        assert_eq!(parts[1].len(), 2);
        assert!(parts[2].ends_with(".json"));
        assert_eq!(parts[2].len(), 30 + ".json".len());
    }

    #[test]
    fn custom_key_renders_literally() {
        let key = CacheKey::custom(["tokens", "alpha"]);
        assert_eq!(key.render(), "tokens/alpha");

        let path = key.fs_path();
        let parts: Vec<_> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        // last segment "alpha" is longer than 2 chars, so it shards
        assert_eq!(parts, vec!["tokens", "al", "pha.json"]);
    }

    #[test]
    fn short_custom_segment_does_not_shard() {
        let key = CacheKey::custom(["ab"]);
        let parts: Vec<_> = key
            .fs_path()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        assert_eq!(parts, vec!["ab.json"]);
    }
}
