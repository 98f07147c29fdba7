//! Command handlers for the modproxy CLI
//!
//! Each handler finishes configuration loading for its command (environment
//! and command-line layers on top of the file already loaded by `main`).

use std::sync::Arc;

use tracing::info;

use crate::app::cache::DirectoryScanner;
use crate::app::server;
use crate::app::vcs::{GitCli, VersionControl};
use crate::config::AppConfig;
use crate::constants::env;
use crate::errors::{ConfigError, Result};

use super::args::{CacheAction, CacheArgs, ServeArgs};

/// Run the proxy until Ctrl-C or SIGTERM
///
/// # Errors
///
/// Returns an error if required configuration is missing or invalid, the
/// cache root cannot be prepared, or the listen address cannot be bound
pub async fn handle_serve(args: ServeArgs, mut config: AppConfig) -> Result<()> {
    config.apply_env()?;
    config.apply_overrides(&args.overrides());
    let proxy = config.to_runtime_config()?;

    info!("Cache root: {}", proxy.cache.cache_root.display());
    info!(
        "Mapping {} -> https://{}/<repository> as {}",
        proxy.source_namespace, proxy.upstream.destination_root, proxy.upstream.git_user
    );
    info!(
        "Fetch limits: {} concurrent, request timeout {:?}, fetch timeout {:?}",
        proxy.fetch.max_concurrent_fetches, proxy.fetch.request_timeout, proxy.fetch.fetch_timeout
    );

    let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&proxy.upstream.git_binary));
    server::serve(&proxy, vcs).await
}

/// Handle cache inspection commands
pub async fn handle_cache(args: CacheArgs, mut config: AppConfig) -> Result<()> {
    config.apply_env()?;
    let cache_root = args
        .cache_dir
        .or(config.cache.cache_root)
        .ok_or_else(|| ConfigError::MissingField {
            field: "cache.cache_root".to_string(),
            hint: format!("{} or --cache-dir", env::CACHE_DIR),
        })?;

    match args.action {
        CacheAction::Stats { json } => {
            let stats = DirectoryScanner::scan_cache_directory(&cache_root).await;
            if json {
                let rendered = serde_json::to_string_pretty(&stats)
                    .map_err(|e| crate::errors::AppError::generic(e.to_string()))?;
                println!("{}", rendered);
            } else {
                println!("{}", stats);
            }
            Ok(())
        }
    }
}
