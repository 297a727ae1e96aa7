//! In-memory cache backend.

use super::{CacheBackend, CacheEntry, CacheKey};
use crate::clock;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local map behind a lock. Concurrent `put`s from parallel
/// sub-requests serialize on the write lock so no write is lost.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let rendered = key.render();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| crate::Error::cache("memory cache lock poisoned"))?;
        match entries.get(&rendered) {
            Some(entry) if entry.is_expired(clock::now_millis()) => {
                entries.remove(&rendered);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<Value> {
        let rendered = key.render();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| crate::Error::cache("memory cache lock poisoned"))?;
        entries.insert(rendered, entry);
        Ok(json!({ "key": key.to_value() }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
