//! Single-flight registry of running fetches
//!
//! The first miss on a key registers a shared outcome; every later miss on
//! the same key awaits that outcome instead of starting its own fetch. The
//! owner removes the registration once the fetch has finished, so failures
//! are never remembered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::app::models::CacheKey;
use crate::errors::FetchResult;

/// Outcome of one fetch attempt, awaitable by any number of requests
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult<()>>>;

/// Whether a caller started a fetch or joined one already running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This caller registered the fetch
    Started,
    /// A fetch for the key was already in flight
    Joined,
}

/// Fetches in flight, keyed by cache key
#[derive(Clone, Default)]
pub struct InflightRegistry {
    fetches: Arc<Mutex<HashMap<CacheKey, SharedFetch>>>,
}

impl InflightRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the fetch in flight for `key`, or register one built by `start`
    ///
    /// `start` runs under the registry lock, so it must only spawn work and
    /// return; it must not call back into the registry synchronously.
    pub fn join_or_start<F>(&self, key: &CacheKey, start: F) -> (SharedFetch, Admission)
    where
        F: FnOnce() -> BoxFuture<'static, FetchResult<()>>,
    {
        let mut fetches = self.lock();
        if let Some(existing) = fetches.get(key) {
            debug!("Joining in-flight fetch for {}", key);
            return (existing.clone(), Admission::Joined);
        }

        let shared = start().shared();
        fetches.insert(key.clone(), shared.clone());
        (shared, Admission::Started)
    }

    /// Drop the registration for `key` once its fetch has finished
    pub fn complete(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    /// Number of fetches in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no fetch is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, SharedFetch>> {
        // The map holds no invariant a panicking holder could break.
        self.fetches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{ModulePath, Version};
    use crate::errors::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(version: &str) -> CacheKey {
        CacheKey::new(
            ModulePath::new("example.com/pkg").unwrap(),
            Version::new(version).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let registry = InflightRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = rx.shared();

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            let starts = starts.clone();
            let rx = rx.clone();
            let (outcome, _) = registry.join_or_start(&key("v1.0.0"), move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = rx.await;
                    Err(FetchError::Upstream {
                        module: "example.com/pkg".to_string(),
                        version: "v1.0.0".to_string(),
                        reason: "denied".to_string(),
                    })
                }
                .boxed()
            });
            outcomes.push(outcome);
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        tx.send(()).unwrap();
        let results = futures::future::join_all(outcomes).await;
        assert!(results.iter().all(|r| r == &results[0]));
        assert!(results[0].is_err());
    }

    #[tokio::test]
    async fn test_completed_key_starts_fresh() {
        let registry = InflightRegistry::new();
        let (_, first) = registry.join_or_start(&key("v1.0.0"), || async { Ok(()) }.boxed());
        let (_, second) = registry.join_or_start(&key("v1.0.0"), || async { Ok(()) }.boxed());
        let (_, other) = registry.join_or_start(&key("v2.0.0"), || async { Ok(()) }.boxed());
        assert_eq!(first, Admission::Started);
        assert_eq!(second, Admission::Joined);
        assert_eq!(other, Admission::Started);

        registry.complete(&key("v1.0.0"));
        let (_, again) = registry.join_or_start(&key("v1.0.0"), || async { Ok(()) }.boxed());
        assert_eq!(again, Admission::Started);
        assert_eq!(registry.len(), 2);
    }
}
