//! Core application logic for modproxy
//!
//! This module contains the request pipeline: name escaping, request routing,
//! the version-control seam, tag listing, the on-disk cache, the single-flight
//! fetcher and the HTTP server that ties them together.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modproxy::app::{GitCli, VersionControl};
//! use modproxy::config::AppConfig;
//!
//! # async fn example() -> modproxy::Result<()> {
//! let mut config = AppConfig::load(None).await?;
//! config.apply_env()?;
//! let proxy = config.to_runtime_config()?;
//!
//! let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&proxy.upstream.git_binary));
//! modproxy::app::server::serve(&proxy, vcs).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod codec;
pub mod fetcher;
pub mod models;
pub mod router;
pub mod server;
pub mod signals;
pub mod tags;
pub mod vcs;

// Re-export main public API
pub use cache::{CacheConfig, CacheManager, CacheStats, CachedArtifact, DirectoryScanner};
pub use fetcher::{Fetcher, FetcherConfig, FetcherConfigBuilder};
pub use models::{ArtifactKind, CacheKey, InfoRecord, ModulePath, Version};
pub use router::{Endpoint, ProxyRequest, RequestRouter};
pub use server::{build_router, serve, serve_with_shutdown, AppState};
pub use tags::{select_latest, TagLister};
pub use vcs::{GitCli, RefKind, RemoteRef, RemoteRepo, RemoteResolver, VersionControl};
