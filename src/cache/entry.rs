//! The stored form of a successful exchange.

use crate::clock;
use crate::http::{Request, Response};
use serde::{Deserialize, Serialize};

/// One cached exchange. `res.handle` is `#[serde(skip)]`, so the
/// transport handle can never reach a backend; callers additionally build
/// entries from [`Response::without_handle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<Request>,
    pub res: Response,
    pub cached_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub success: bool,
}

impl CacheEntry {
    pub fn new(req: Option<Request>, res: &Response, cached_at: i64, expires_at: Option<i64>) -> Self {
        CacheEntry {
            req,
            success: res.is_success_status(),
            res: res.without_handle(),
            cached_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        clock::expired(self.expires_at, now)
    }
}
