//! Filesystem cache backend.
//!
//! Entries are pretty-printed JSON under a root directory, laid out by
//! [`CacheKey::fs_path`]. Writes go to a temporary file in the destination
//! directory and are renamed into place, so a concurrent reader sees either
//! the old entry or the new one, never a partial file. Directories are
//! created lazily; missing or unparseable files read as `None`; expired
//! entries are deleted on read.

use super::{CacheBackend, CacheEntry, CacheKey};
use crate::clock;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.fs_path())
    }
}

#[async_trait]
impl CacheBackend for FsCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unparseable cache file");
                return Ok(None);
            }
        };
        if entry.is_expired(clock::now_millis()) {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<Value> {
        let path = self.entry_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| crate::Error::cache("cache key renders to an empty path"))?;
        fs::create_dir_all(dir).await?;

        // Temp file in the same directory: rename is atomic within one
        // filesystem.
        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(&entry)?;
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(json!({
            "key": key.to_value(),
            "path": path.display().to_string(),
        }))
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
