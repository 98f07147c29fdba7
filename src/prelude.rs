//! Prelude module for modproxy
//!
//! Re-exports the items needed to embed the proxy with a single
//! `use modproxy::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use modproxy::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut config = AppConfig::load(None).await?;
//!     config.apply_env()?;
//!     let proxy = config.to_runtime_config()?;
//!
//!     let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&proxy.upstream.git_binary));
//!     serve(&proxy, vcs).await
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Configuration
pub use crate::config::{AppConfig, ConfigOverrides, ProxyConfig};

// Pipeline components
pub use crate::app::{
    serve, serve_with_shutdown, AppState, ArtifactKind, CacheConfig, CacheKey, CacheManager,
    Fetcher, FetcherConfig, GitCli, ModulePath, RequestRouter, TagLister, Version,
    VersionControl,
};
