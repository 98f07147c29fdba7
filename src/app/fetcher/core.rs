//! Cache population through the version-control capability
//!
//! A fetch runs in its own task so that a request giving up (timeout or
//! client disconnect) does not abandon work other requests can reuse. The
//! task is bounded by the fetch timeout; when that elapses the checkout is
//! killed and the scratch workspace removed.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::app::cache::CacheManager;
use crate::app::models::{ArtifactKind, CacheKey, InfoRecord, ModulePath};
use crate::app::vcs::{RemoteResolver, VersionControl};
use crate::errors::{AppError, CacheError, FetchError, FetchResult, VcsError};

use super::config::FetcherConfig;
use super::inflight::{Admission, InflightRegistry};

/// Populates missing cache entries, one fetch per key at a time
#[derive(Clone)]
pub struct Fetcher {
    vcs: Arc<dyn VersionControl>,
    resolver: RemoteResolver,
    cache: Arc<CacheManager>,
    config: FetcherConfig,
    permits: Arc<Semaphore>,
    inflight: InflightRegistry,
}

impl Fetcher {
    /// Create a new fetcher
    ///
    /// # Arguments
    ///
    /// * `vcs` - Version-control backend used for checkout and archiving
    /// * `resolver` - Maps module paths to destination repositories
    /// * `cache` - Cache store the fetched entries are installed into
    /// * `config` - Timeouts and concurrency bound
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        resolver: RemoteResolver,
        cache: Arc<CacheManager>,
        config: FetcherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_fetches));
        Self {
            vcs,
            resolver,
            cache,
            config,
            permits,
            inflight: InflightRegistry::new(),
        }
    }

    /// Get the fetcher configuration
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Number of fetches currently in flight
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Make sure a complete entry for `key` is installed
    ///
    /// Joins the fetch already running for `key` if there is one. Every
    /// caller waiting on the same attempt receives the same outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fetch` with the attempt's failure, or
    /// `AppError::RequestTimeout` if the wait exceeded the request timeout
    /// (the fetch itself keeps running)
    pub async fn ensure(&self, key: &CacheKey) -> Result<(), AppError> {
        let (outcome, admission) = self
            .inflight
            .join_or_start(key, || self.spawn_fetch(key.clone()));
        if admission == Admission::Joined {
            debug!("Waiting on running fetch for {}", key);
        }

        match tokio::time::timeout(self.config.request_timeout, outcome).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => {
                warn!(
                    "Gave up waiting for {} after {:?}, fetch continues in background",
                    key, self.config.request_timeout
                );
                Err(AppError::RequestTimeout {
                    seconds: self.config.request_timeout.as_secs(),
                })
            }
        }
    }

    fn spawn_fetch(&self, key: CacheKey) -> BoxFuture<'static, FetchResult<()>> {
        let this = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _registration = Registration {
                inflight: this.inflight.clone(),
                key: task_key.clone(),
            };
            this.fetch_bounded(&task_key).await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(FetchError::Internal {
                    module: key.module.to_string(),
                    version: key.version.to_string(),
                    reason: format!("fetch task failed: {}", e),
                })
            })
        }
        .boxed()
    }

    async fn fetch_bounded(&self, key: &CacheKey) -> FetchResult<()> {
        // Another attempt may have installed the entry since the caller probed.
        if let Ok(true) = self.cache.contains(key).await {
            debug!("{} was installed meanwhile, skipping fetch", key);
            return Ok(());
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Internal {
                module: key.module.to_string(),
                version: key.version.to_string(),
                reason: "fetch limiter closed".to_string(),
            })?;

        let started = Instant::now();
        info!("Fetching {} via {}", key, self.vcs.backend_name());

        match tokio::time::timeout(self.config.fetch_timeout, self.run_fetch(key)).await {
            Ok(Ok(files)) => {
                info!(
                    "Fetched {} ({} files) in {:.2?}",
                    key,
                    files,
                    started.elapsed()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Fetch of {} failed after {:.2?}: {}", key, started.elapsed(), e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Fetch of {} exceeded {:?}, abandoning",
                    key, self.config.fetch_timeout
                );
                Err(FetchError::TimedOut {
                    module: key.module.to_string(),
                    version: key.version.to_string(),
                    seconds: self.config.fetch_timeout.as_secs(),
                })
            }
        }
    }

    /// Check out the ref, build the three artifacts and install them
    ///
    /// Returns the number of files archived. Nothing is installed unless
    /// every step succeeds; the scratch workspace and staged entry are
    /// removed when they go out of scope.
    async fn run_fetch(&self, key: &CacheKey) -> FetchResult<usize> {
        let (module, version) = (key.module.as_str(), key.version.as_str());
        let vcs_error = |e: VcsError| FetchError::from_vcs(module, version, &e);
        let cache_error = |e: CacheError| FetchError::from_cache(module, version, &e);

        let remote = self.resolver.resolve(&key.module).map_err(vcs_error)?;
        let scratch = self.cache.scratch().map_err(cache_error)?;
        let workdir = scratch.path().join("src");

        debug!("Checking out {} of {}", version, remote);
        self.vcs
            .checkout_ref(&remote, version, &workdir)
            .await
            .map_err(vcs_error)?;
        let time = self
            .vcs
            .resolve_commit_time(&workdir)
            .await
            .map_err(vcs_error)?;

        let staged = self.cache.stage(key).map_err(cache_error)?;
        staged
            .write_info(&InfoRecord::new(&key.version, time))
            .await
            .map_err(cache_error)?;

        let descriptor = self
            .read_descriptor(&key.module, &workdir)
            .await
            .map_err(cache_error)?;
        staged
            .write_descriptor(&descriptor)
            .await
            .map_err(cache_error)?;

        let files = self
            .vcs
            .create_archive(
                &workdir,
                &key.archive_prefix(),
                &staged.artifact_path(ArtifactKind::Archive),
            )
            .await
            .map_err(vcs_error)?;

        self.cache.install(staged).await.map_err(cache_error)?;
        Ok(files)
    }

    /// Descriptor bytes from the tree root, or a minimal one naming the module
    async fn read_descriptor(
        &self,
        module: &ModulePath,
        workdir: &Path,
    ) -> Result<Vec<u8>, CacheError> {
        let path = workdir.join(&self.config.descriptor_file);
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "{} has no {}, synthesizing one",
                    module, self.config.descriptor_file
                );
                Ok(format!("module {}\n", module).into_bytes())
            }
            Err(e) => Err(CacheError::io(format!("reading {}", path.display()), e)),
        }
    }
}

/// Removes a key from the in-flight registry when its fetch task ends,
/// including by panic
struct Registration {
    inflight: InflightRegistry,
    key: CacheKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inflight.complete(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::cache::CacheConfig;
    use crate::app::fetcher::FetcherConfigBuilder;
    use crate::app::models::Version;
    use crate::app::vcs::{RemoteRef, RemoteRepo};
    use crate::errors::VcsResult;
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes a tiny tree; optionally slow or failing
    #[derive(Default)]
    struct ScriptedVcs {
        checkouts: AtomicUsize,
        delay: Duration,
        fail_auth: bool,
        with_descriptor: bool,
        panic_first: bool,
        running: AtomicUsize,
        peak_running: AtomicUsize,
    }

    #[async_trait]
    impl VersionControl for ScriptedVcs {
        async fn list_tags(&self, _: &RemoteRepo) -> VcsResult<Vec<RemoteRef>> {
            Ok(vec![])
        }

        async fn checkout_ref(&self, remote: &RemoteRepo, _: &str, dest: &Path) -> VcsResult<()> {
            let call = self.checkouts.fetch_add(1, Ordering::SeqCst);
            if self.panic_first && call == 0 {
                panic!("checkout backend crashed");
            }

            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail_auth {
                return Err(VcsError::AuthenticationFailed {
                    remote: remote.redacted(),
                    stderr: "fatal: Authentication failed".to_string(),
                });
            }
            fs::create_dir_all(dest.join(".git")).await?;
            fs::write(dest.join(".git/HEAD"), "ref: refs/heads/main\n").await?;
            fs::write(dest.join("lib.go"), "package pkg\n").await?;
            if self.with_descriptor {
                fs::write(dest.join("go.mod"), "module example.com/pkg\n\ngo 1.21\n").await?;
            }
            Ok(())
        }

        async fn resolve_commit_time(&self, _: &Path) -> VcsResult<DateTime<FixedOffset>> {
            Ok(DateTime::parse_from_rfc3339("2023-05-01T12:00:00+02:00").unwrap())
        }

        fn backend_name(&self) -> &'static str {
            "scripted"
        }
    }

    async fn fetcher(root: &Path, vcs: Arc<ScriptedVcs>, config: FetcherConfig) -> Fetcher {
        let cache = CacheManager::new(CacheConfig::with_cache_root(root))
            .await
            .unwrap();
        Fetcher::new(
            vcs,
            RemoteResolver::new("github.com/acme", "x-access-token", "s3cr3t"),
            Arc::new(cache),
            config,
        )
    }

    fn key(version: &str) -> CacheKey {
        CacheKey::new(
            ModulePath::new("example.com/pkg").unwrap(),
            Version::new(version).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fetch_installs_all_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            with_descriptor: true,
            ..Default::default()
        });
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), FetcherConfig::default()).await;
        let key = key("v1.0.0");

        fetcher.ensure(&key).await.unwrap();
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 1);

        let entry = temp_dir.path().join("example.com/pkg/@v/v1.0.0");
        let info = std::fs::read_to_string(entry.join("v1.0.0.info")).unwrap();
        assert_eq!(
            info,
            r#"{"Version":"v1.0.0","Time":"2023-05-01T12:00:00+02:00"}"#
        );
        let descriptor = std::fs::read_to_string(entry.join("v1.0.0.mod")).unwrap();
        assert_eq!(descriptor, "module example.com/pkg\n\ngo 1.21\n");
        assert!(entry.join("v1.0.0.zip").is_file());

        fetcher.ensure(&key).await.unwrap();
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_synthesized() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs::default());
        let fetcher = fetcher(temp_dir.path(), vcs, FetcherConfig::default()).await;

        fetcher.ensure(&key("main")).await.unwrap();
        let descriptor =
            std::fs::read_to_string(temp_dir.path().join("example.com/pkg/@v/main/main.mod"))
                .unwrap();
        assert_eq!(descriptor, "module example.com/pkg\n");
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            fail_auth: true,
            ..Default::default()
        });
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), FetcherConfig::default()).await;

        let err = fetcher.ensure(&key("v1.0.0")).await.unwrap_err();
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(!err.to_string().contains("s3cr3t"));
        assert!(!temp_dir.path().join("example.com").exists());
        assert_eq!(
            std::fs::read_dir(temp_dir.path().join(".staging"))
                .unwrap()
                .count(),
            0
        );

        // Failures are not remembered
        fetcher.ensure(&key("v1.0.0")).await.unwrap_err();
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_single_flight() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), FetcherConfig::default()).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let fetcher = fetcher.clone();
                tokio::spawn(async move { fetcher.ensure(&key("v1.0.0")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_fetch_running() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            delay: Duration::from_millis(300),
            ..Default::default()
        });
        let config = FetcherConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), config).await;

        let err = fetcher.ensure(&key("v1.0.0")).await.unwrap_err();
        assert!(matches!(err, AppError::RequestTimeout { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(temp_dir
            .path()
            .join("example.com/pkg/@v/v1.0.0/v1.0.0.zip")
            .is_file());
        assert_eq!(fetcher.inflight_count(), 0);
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_abandons_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let config = FetcherConfig {
            fetch_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let fetcher = fetcher(temp_dir.path(), vcs, config).await;

        let err = fetcher.ensure(&key("v1.0.0")).await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(FetchError::TimedOut { .. })));
        assert!(!temp_dir.path().join("example.com").exists());
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_not_remembered() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            panic_first: true,
            ..Default::default()
        });
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), FetcherConfig::default()).await;
        let key = key("v1.0.0");

        let err = fetcher.ensure(&key).await.unwrap_err();
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(fetcher.inflight_count(), 0);

        fetcher.ensure(&key).await.unwrap();
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 2);
        assert!(temp_dir
            .path()
            .join("example.com/pkg/@v/v1.0.0/v1.0.0.zip")
            .is_file());
    }

    #[tokio::test]
    async fn test_distinct_keys_respect_global_bound() {
        let temp_dir = TempDir::new().unwrap();
        let vcs = Arc::new(ScriptedVcs {
            delay: Duration::from_millis(150),
            ..Default::default()
        });
        let config = FetcherConfigBuilder::new()
            .max_concurrent_fetches(2)
            .build()
            .unwrap();
        let fetcher = fetcher(temp_dir.path(), vcs.clone(), config).await;

        let keys: Vec<CacheKey> = (0..6).map(|i| key(&format!("v1.{}.0", i))).collect();
        let results = futures::future::join_all(keys.iter().map(|k| fetcher.ensure(k))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(vcs.checkouts.load(Ordering::SeqCst), 6);
        assert_eq!(vcs.peak_running.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.inflight_count(), 0);
    }
}
