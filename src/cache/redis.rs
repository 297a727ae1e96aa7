//! Remote KV cache backend (Redis).
//!
//! One network round-trip per operation. Stored values embed their
//! canonical key; expiry is delegated to the server via `PX`, derived from
//! `expires_at - now` at write time. Compiled only with the
//! `redis-backend` feature: without it, the type does not exist and
//! construction fails at compile time rather than at runtime.

use super::{CacheBackend, CacheEntry, CacheKey};
use crate::clock;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to a Redis instance, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| crate::Error::cache(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| crate::Error::cache(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let rendered = key.render();
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&rendered)
            .await
            .map_err(|e| crate::Error::cache(e.to_string()))?;
        let Some(raw) = raw else { return Ok(None) };
        let stored: StoredEntry = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "unparseable cache value");
                return Ok(None);
            }
        };
        if stored.entry.is_expired(clock::now_millis()) {
            let _: std::result::Result<u64, _> = conn.del(&rendered).await;
            return Ok(None);
        }
        Ok(Some(stored.entry))
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<Value> {
        let rendered = key.render();
        let ttl_ms = entry
            .expires_at
            .map(|t| (t - clock::now_millis()).max(1) as u64);
        let stored = StoredEntry {
            key: rendered.clone(),
            entry,
        };
        let raw = serde_json::to_string(&stored)?;
        let mut conn = self.conn.clone();
        match ttl_ms {
            Some(ms) => {
                let _: () = conn
                    .pset_ex(&rendered, raw, ms)
                    .await
                    .map_err(|e| crate::Error::cache(e.to_string()))?;
            }
            None => {
                let _: () = conn
                    .set(&rendered, raw)
                    .await
                    .map_err(|e| crate::Error::cache(e.to_string()))?;
            }
        }
        Ok(json!({ "key": key.to_value() }))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
