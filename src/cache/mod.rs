//! Pluggable cache backends.
//!
//! The resolver talks to a [`CacheBackend`] through two operations:
//! `lookup` and `put`, both taking a [`CacheKey`]. Shipped backends:
//!
//! | Backend | Medium |
//! |---------|--------|
//! | [`MemoryCache`] | process-local map behind a lock |
//! | [`FsCache`] | JSON files, atomic-rename writes |
//! | `RedisCache` *(feature `redis-backend`)* | remote KV, one round-trip per op |
//!
//! Contract: tolerate `None` param projections, never error on a miss, and
//! treat entries whose `expires_at` is past as absent (the filesystem and
//! remote backends delete them on such reads).

mod entry;
mod key;
mod memory;

pub mod fs;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use entry::CacheEntry;
pub use fs::FsCache;
pub use key::CacheKey;
pub use memory::MemoryCache;
#[cfg(feature = "redis-backend")]
pub use redis::RedisCache;

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a non-expired entry, or `None`. A miss is not an error.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry, returning backend metadata. Every backend includes at
    /// least `{"key": <key>}`.
    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<Value>;

    fn name(&self) -> &'static str;
}
