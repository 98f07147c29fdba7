//! End-to-end tests for the proxy server
//!
//! A real server is bound to an ephemeral port and driven over HTTP. The
//! version-control backend is a fake that serves canned repositories and
//! counts checkouts, so cache hits and single-flight behaviour are visible.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::future::join_all;
use tempfile::TempDir;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use modproxy::app::{
    serve_with_shutdown, AppState, CacheConfig, FetcherConfigBuilder, ModulePath, RemoteRef,
    RemoteRepo, VersionControl,
};
use modproxy::config::{ProxyConfig, UpstreamConfig};
use modproxy::errors::{VcsError, VcsResult};

const TOKEN: &str = "ghp_s3cr3t";

/// Canned repository on the fake destination host
#[derive(Clone, Default)]
struct FakeRepo {
    tags: Vec<&'static str>,
    branches: Vec<&'static str>,
    descriptor: Option<&'static str>,
    deny: bool,
}

#[derive(Default)]
struct FakeGit {
    repos: HashMap<&'static str, FakeRepo>,
    checkout_delay: Duration,
    checkouts: AtomicUsize,
    listings: AtomicUsize,
}

impl FakeGit {
    fn with_repo(mut self, name: &'static str, repo: FakeRepo) -> Self {
        self.repos.insert(name, repo);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.checkout_delay = delay;
        self
    }

    fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    fn repo(&self, remote: &RemoteRepo) -> VcsResult<&FakeRepo> {
        let url = remote.authenticated_url();
        let name = url.rsplit('/').next().unwrap_or_default();
        match self.repos.get(name) {
            Some(repo) if repo.deny => Err(VcsError::AuthenticationFailed {
                remote: remote.redacted(),
                stderr: remote.scrub(&format!("fatal: Authentication failed for '{}'", url)),
            }),
            Some(repo) => Ok(repo),
            None => Err(VcsError::RepositoryNotFound {
                remote: remote.redacted(),
            }),
        }
    }
}

#[async_trait]
impl VersionControl for FakeGit {
    async fn list_tags(&self, remote: &RemoteRepo) -> VcsResult<Vec<RemoteRef>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let repo = self.repo(remote)?;
        Ok(repo
            .tags
            .iter()
            .map(|t| RemoteRef::tag(*t))
            .chain(repo.branches.iter().map(|b| RemoteRef::branch(*b)))
            .collect())
    }

    async fn checkout_ref(
        &self,
        remote: &RemoteRepo,
        reference: &str,
        dest: &Path,
    ) -> VcsResult<()> {
        let count = self.checkouts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.checkout_delay).await;

        let repo = self.repo(remote)?;
        let known = repo.tags.iter().chain(&repo.branches).any(|r| *r == reference);
        if !known {
            return Err(VcsError::RefNotFound {
                remote: remote.redacted(),
                reference: reference.to_string(),
            });
        }

        fs::create_dir_all(dest.join(".git")).await?;
        fs::create_dir_all(dest.join("internal")).await?;
        fs::write(dest.join(".git/HEAD"), "ref: refs/heads/main\n").await?;
        fs::write(dest.join("widget.go"), format!("package widget // {}\n", reference)).await?;
        fs::write(dest.join("internal/rev.txt"), format!("checkout {}\n", count)).await?;
        if let Some(descriptor) = repo.descriptor {
            fs::write(dest.join("go.mod"), descriptor).await?;
        }
        Ok(())
    }

    async fn resolve_commit_time(&self, _workdir: &Path) -> VcsResult<DateTime<FixedOffset>> {
        Ok(DateTime::parse_from_rfc3339("2024-03-05T09:30:00+01:00").unwrap())
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

struct TestProxy {
    base: String,
    cache_dir: TempDir,
    vcs: Arc<FakeGit>,
    client: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestProxy {
    async fn start(vcs: FakeGit) -> Self {
        Self::start_with(vcs, |config| config).await
    }

    async fn start_with(vcs: FakeGit, tweak: impl FnOnce(ProxyConfig) -> ProxyConfig) -> Self {
        let cache_dir = TempDir::new().unwrap();
        let vcs = Arc::new(vcs);

        let config = tweak(ProxyConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            source_namespace: ModulePath::new("example.com/acme").unwrap(),
            upstream: UpstreamConfig {
                destination_root: "git.example.net/acme-mirror".to_string(),
                git_user: "x-access-token".to_string(),
                token: TOKEN.to_string(),
                git_binary: PathBuf::from("git"),
                list_timeout: Duration::from_secs(5),
            },
            cache: CacheConfig::with_cache_root(cache_dir.path()),
            fetch: FetcherConfigBuilder::new()
                .request_timeout(Duration::from_secs(10))
                .fetch_timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        });

        let state = AppState::new(&config, vcs.clone()).await.unwrap();
        let listener = TcpListener::bind(config.listen_addr).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let (shutdown, stopped) = oneshot::channel::<()>();
        tokio::spawn(serve_with_shutdown(listener, state, async move {
            let _ = stopped.await;
        }));

        Self {
            base,
            cache_dir,
            vcs,
            client: reqwest::Client::new(),
            _shutdown: shutdown,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
    }

    async fn get_text(&self, path: &str) -> (u16, String) {
        let response = self.get(path).await;
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    fn entry_dir(&self, module: &str, version: &str) -> PathBuf {
        self.cache_dir.path().join(module).join("@v").join(version)
    }
}

fn widget() -> FakeRepo {
    FakeRepo {
        tags: vec!["v1.0.0", "v1.2.0", "v1.10.0-rc.1", "release-2023"],
        branches: vec!["main"],
        descriptor: Some("module example.com/acme/widget\n\ngo 1.21\n"),
        deny: false,
    }
}

fn proxy_fake() -> FakeGit {
    FakeGit::default()
        .with_repo("widget", widget())
        .with_repo(
            "bare",
            FakeRepo {
                tags: vec!["v0.1.0"],
                ..Default::default()
            },
        )
        .with_repo(
            "private",
            FakeRepo {
                tags: vec!["v1.0.0"],
                deny: true,
                ..Default::default()
            },
        )
        .with_repo(
            "MyRepo",
            FakeRepo {
                tags: vec!["v2.0.0"],
                ..Default::default()
            },
        )
}

#[tokio::test]
async fn test_list_returns_sorted_tags_only() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let response = proxy.get("/example.com/acme/widget/@v/list").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=UTF-8"
    );
    assert_eq!(
        response.text().await.unwrap(),
        "release-2023\nv1.0.0\nv1.10.0-rc.1\nv1.2.0\n"
    );
    assert_eq!(proxy.vcs.checkouts(), 0);
}

#[tokio::test]
async fn test_list_of_escaped_module() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/example.com/acme/!my!repo/@v/list").await;
    assert_eq!(status, 200);
    assert_eq!(body, "v2.0.0\n");
}

#[tokio::test]
async fn test_list_failure_is_not_found() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/example.com/acme/missing/@v/list").await;
    assert_eq!(status, 404);
    assert!(body.contains("example.com/acme/missing"), "{}", body);

    let (status, body) = proxy.get_text("/example.com/acme/private/@v/list").await;
    assert_eq!(status, 404);
    assert!(!body.contains(TOKEN), "{}", body);
}

#[tokio::test]
async fn test_cold_then_warm_info() {
    let proxy = TestProxy::start(proxy_fake()).await;
    let path = "/example.com/acme/widget/@v/v1.0.0.info";

    let response = proxy.get(path).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.headers()["cache-control"], "no-store");
    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        r#"{"Version":"v1.0.0","Time":"2024-03-05T09:30:00+01:00"}"#
    );
    assert_eq!(proxy.vcs.checkouts(), 1);

    // All three artifacts were installed by the one fetch
    let entry = proxy.entry_dir("example.com/acme/widget", "v1.0.0");
    for name in ["v1.0.0.info", "v1.0.0.mod", "v1.0.0.zip"] {
        assert!(entry.join(name).is_file(), "{} missing", name);
    }

    let (status, warm) = proxy.get_text(path).await;
    assert_eq!(status, 200);
    assert_eq!(warm, body);
    let (status, descriptor) = proxy.get_text("/example.com/acme/widget/@v/v1.0.0.mod").await;
    assert_eq!(status, 200);
    assert_eq!(descriptor, "module example.com/acme/widget\n\ngo 1.21\n");
    assert_eq!(proxy.vcs.checkouts(), 1);
}

#[tokio::test]
async fn test_descriptor_synthesized_when_absent() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/example.com/acme/bare/@v/v0.1.0.mod").await;
    assert_eq!(status, 200);
    assert_eq!(body, "module example.com/acme/bare\n");
}

#[tokio::test]
async fn test_zip_is_rooted_at_module_and_version() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let response = proxy.get("/example.com/acme/widget/@v/v1.2.0.zip").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/zip");
    assert_eq!(response.headers()["cache-control"], "no-store");
    let bytes = response.bytes().await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "example.com/acme/widget@v1.2.0/go.mod",
            "example.com/acme/widget@v1.2.0/internal/rev.txt",
            "example.com/acme/widget@v1.2.0/widget.go",
        ]
    );

    let mut source = String::new();
    archive
        .by_name("example.com/acme/widget@v1.2.0/widget.go")
        .unwrap()
        .read_to_string(&mut source)
        .unwrap();
    assert_eq!(source, "package widget // v1.2.0\n");
}

#[tokio::test]
async fn test_latest_prefers_highest_release() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/example.com/acme/widget/@latest").await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        r#"{"Version":"v1.2.0","Time":"2024-03-05T09:30:00+01:00"}"#
    );
}

#[tokio::test]
async fn test_namespace_and_method_rejection() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/unrelated.org/pkg/@v/list").await;
    assert_eq!(status, 404);
    assert_eq!(body, "/unrelated.org/pkg/@v/list is ignored\n");

    let response = proxy
        .client
        .post(format!("{}/example.com/acme/widget/@v/list", proxy.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(proxy.vcs.listings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_requests_are_bad_requests() {
    let proxy = TestProxy::start(proxy_fake()).await;

    for path in [
        "/example.com/acme/widget/@v/v1.0.0.tar",
        "/example.com/acme/widget/@v/",
        "/example.com/acme/Widget/@v/list",
        "/example.com/acme/widget/@v/v1.0.0!.info",
    ] {
        let response = proxy.get(path).await;
        assert_eq!(response.status(), 400, "{}", path);
        assert_eq!(response.headers()["cache-control"], "no-store");
    }
    assert_eq!(proxy.vcs.checkouts(), 0);
}

#[tokio::test]
async fn test_unknown_ref_is_not_found() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, _) = proxy.get_text("/example.com/acme/widget/@v/v9.9.9.info").await;
    assert_eq!(status, 404);
    assert!(!proxy.entry_dir("example.com/acme/widget", "v9.9.9").exists());
}

#[tokio::test]
async fn test_auth_failure_leaves_no_partial_entry() {
    let proxy = TestProxy::start(proxy_fake()).await;

    let (status, body) = proxy.get_text("/example.com/acme/private/@v/v1.0.0.zip").await;
    assert_eq!(status, 500);
    assert!(!body.contains(TOKEN), "{}", body);
    assert!(!proxy.cache_dir.path().join("example.com/acme/private").exists());

    // Failures are not remembered
    let (status, _) = proxy.get_text("/example.com/acme/private/@v/v1.0.0.zip").await;
    assert_eq!(status, 500);
    assert_eq!(proxy.vcs.checkouts(), 2);
}

#[tokio::test]
async fn test_concurrent_cold_requests_share_one_fetch() {
    let fake = proxy_fake().with_delay(Duration::from_millis(300));
    let proxy = TestProxy::start(fake).await;
    let path = "/example.com/acme/widget/@v/v1.0.0.zip";

    let responses = join_all((0..8).map(|_| async {
        let response = proxy.get(path).await;
        let status = response.status().as_u16();
        (status, response.bytes().await.unwrap())
    }))
    .await;

    assert_eq!(proxy.vcs.checkouts(), 1);
    let first = &responses[0].1;
    for (status, bytes) in &responses {
        assert_eq!(*status, 200);
        assert_eq!(bytes, first);
    }
}

#[tokio::test]
async fn test_concurrent_failures_share_one_error() {
    let fake = proxy_fake().with_delay(Duration::from_millis(300));
    let proxy = TestProxy::start(fake).await;
    let path = "/example.com/acme/private/@v/v1.0.0.info";

    let responses = join_all((0..5).map(|_| proxy.get_text(path))).await;

    assert_eq!(proxy.vcs.checkouts(), 1);
    let first = &responses[0];
    assert_eq!(first.0, 500);
    for response in &responses {
        assert_eq!(response, first);
    }
}

#[tokio::test]
async fn test_slow_fetch_times_out_request_but_completes() {
    let fake = proxy_fake().with_delay(Duration::from_millis(600));
    let proxy = TestProxy::start_with(fake, |mut config| {
        config.fetch.request_timeout = Duration::from_millis(150);
        config
    })
    .await;
    let path = "/example.com/acme/widget/@v/v1.0.0.info";

    let (status, _) = proxy.get_text(path).await;
    assert_eq!(status, 504);

    tokio::time::sleep(Duration::from_millis(900)).await;
    let (status, _) = proxy.get_text(path).await;
    assert_eq!(status, 200);
    assert_eq!(proxy.vcs.checkouts(), 1);
}

#[tokio::test]
async fn test_branch_entries_refresh_after_ttl() {
    let proxy = TestProxy::start_with(proxy_fake(), |mut config| {
        config.cache = config
            .cache
            .with_mutable_ref_ttl(Some(Duration::from_millis(200)));
        config
    })
    .await;

    let (status, _) = proxy.get_text("/example.com/acme/widget/@v/main.info").await;
    assert_eq!(status, 200);
    let (status, _) = proxy.get_text("/example.com/acme/widget/@v/v1.0.0.info").await;
    assert_eq!(status, 200);
    assert_eq!(proxy.vcs.checkouts(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The branch entry is refetched, the release entry stays put
    let (status, _) = proxy.get_text("/example.com/acme/widget/@v/main.info").await;
    assert_eq!(status, 200);
    let (status, _) = proxy.get_text("/example.com/acme/widget/@v/v1.0.0.info").await;
    assert_eq!(status, 200);
    assert_eq!(proxy.vcs.checkouts(), 3);

    let descriptor = std::fs::read_to_string(
        proxy
            .entry_dir("example.com/acme/widget", "main")
            .join("main.mod"),
    )
    .unwrap();
    assert_eq!(descriptor, "module example.com/acme/widget\n\ngo 1.21\n");
}

#[tokio::test]
async fn test_branch_entries_are_sticky_without_ttl() {
    let proxy = TestProxy::start(proxy_fake()).await;

    for _ in 0..3 {
        let (status, _) = proxy.get_text("/example.com/acme/widget/@v/main.zip").await;
        assert_eq!(status, 200);
    }
    assert_eq!(proxy.vcs.checkouts(), 1);
}
