//! Response server
//!
//! A single axum fallback handler drives the pipeline: route and decode the
//! request, answer `list` and `@latest` from the tag lister, and serve
//! `.info`/`.mod`/`.zip` from the cache, fetching on a miss and probing
//! exactly once more afterwards. Every response carries
//! `Cache-Control: no-store`.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::app::cache::{CacheManager, CachedArtifact};
use crate::app::fetcher::Fetcher;
use crate::app::models::{ArtifactKind, CacheKey};
use crate::app::router::{Endpoint, RequestRouter};
use crate::app::signals;
use crate::app::tags::TagLister;
use crate::app::vcs::VersionControl;
use crate::config::ProxyConfig;
use crate::constants::http;
use crate::errors::{AppError, Result};

/// Shared state of the request pipeline
#[derive(Clone)]
pub struct AppState {
    router: Arc<RequestRouter>,
    tags: TagLister,
    cache: Arc<CacheManager>,
    fetcher: Fetcher,
}

impl AppState {
    /// Build every pipeline component from the runtime configuration
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cache` if the cache root cannot be prepared
    pub async fn new(config: &ProxyConfig, vcs: Arc<dyn VersionControl>) -> Result<Self> {
        let cache = Arc::new(CacheManager::new(config.cache.clone()).await?);
        let resolver = config.upstream.resolver();
        let tags = TagLister::new(vcs.clone(), resolver.clone(), config.upstream.list_timeout);
        let fetcher = Fetcher::new(vcs, resolver, cache.clone(), config.fetch.clone());

        Ok(Self {
            router: Arc::new(RequestRouter::new(config.source_namespace.clone())),
            tags,
            cache,
            fetcher,
        })
    }

    /// The cache store
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The fetcher
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }
}

/// Build the axum application
pub fn build_router(state: AppState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM
///
/// # Errors
///
/// Returns an error if the pipeline cannot be built or the address bound
pub async fn serve(config: &ProxyConfig, vcs: Arc<dyn VersionControl>) -> Result<()> {
    let backend = vcs.backend_name();
    let state = AppState::new(config, vcs).await?;
    let listener = TcpListener::bind(config.listen_addr).await?;

    info!(
        "Serving {} from {} via {} on {}",
        config.source_namespace,
        config.upstream.destination_root,
        backend,
        listener.local_addr()?
    );
    serve_with_shutdown(listener, state, signals::shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn handle_request(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    match dispatch(&state, &method, uri.path()).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(state: &AppState, method: &Method, path: &str) -> Result<Response> {
    let request = state.router.route(method, path)?;
    let module = request.module;

    match request.endpoint {
        Endpoint::List => {
            info!("list {}", module);
            let tags = state.tags.list(&module).await?;
            let mut body = tags.into_iter().collect::<Vec<_>>().join("\n");
            if !body.is_empty() {
                body.push('\n');
            }
            Ok(text_response(StatusCode::OK, body))
        }
        Endpoint::Latest => {
            info!("latest {}", module);
            let version = state.tags.latest(&module).await?;
            debug!("Latest version of {} is {}", module, version);
            serve_artifact(state, CacheKey::new(module, version), ArtifactKind::Info).await
        }
        Endpoint::Artifact { version, kind } => {
            info!("{} {}@{}", kind, module, version);
            serve_artifact(state, CacheKey::new(module, version), kind).await
        }
    }
}

async fn serve_artifact(state: &AppState, key: CacheKey, kind: ArtifactKind) -> Result<Response> {
    if let Some(artifact) = state.cache.open(&key, kind).await? {
        debug!("Cache hit for {} ({})", key, kind);
        return Ok(artifact_response(artifact, kind));
    }

    debug!("Cache miss for {} ({})", key, kind);
    state.fetcher.ensure(&key).await?;

    match state.cache.open(&key, kind).await? {
        Some(artifact) => Ok(artifact_response(artifact, kind)),
        None => Err(AppError::generic(format!(
            "{} not in cache after a successful fetch",
            key
        ))),
    }
}

fn artifact_response(artifact: CachedArtifact, kind: ArtifactKind) -> Response {
    let mut response = Body::from_stream(ReaderStream::new(artifact.file)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.len));
    with_headers(response, kind.content_type())
}

fn text_response(status: StatusCode, body: String) -> Response {
    with_headers((status, body).into_response(), http::CONTENT_TYPE_TEXT)
}

fn with_headers(mut response: Response, content_type: &'static str) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(http::NO_STORE));
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("[{}] {}", self.category(), self);
        } else {
            debug!("[{}] {} -> {}", self.category(), self, status);
        }
        text_response(status, format!("{}\n", self))
    }
}
