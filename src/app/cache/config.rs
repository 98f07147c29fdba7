//! Cache configuration types
//!
//! The cache root is always supplied by the caller; there is no implicit
//! default location for a shared proxy cache.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the cache store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cache storage
    pub cache_root: PathBuf,
    /// Age after which entries for mutable versions are re-fetched (None = never)
    #[serde(default, with = "humantime_serde")]
    pub mutable_ref_ttl: Option<Duration>,
}

impl CacheConfig {
    /// Create a new cache configuration rooted at `cache_root`
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            mutable_ref_ttl: None,
        }
    }

    /// Set the refresh age for entries backed by branch names
    pub fn with_mutable_ref_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.mutable_ref_ttl = ttl;
        self
    }
}
