//! modproxy CLI application
//!
//! Runs the module proxy, or inspects its on-disk cache.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use modproxy::cli::{handle_cache, handle_serve, Cli, Commands};
use modproxy::config::AppConfig;
use modproxy::constants::env;
use modproxy::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config = AppConfig::load(cli.global.config.clone()).await?;

    init_logging(&cli, &config);

    info!("modproxy v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve(args) => {
            info!("Executing serve command");
            handle_serve(args, config).await
        }
        Commands::Cache(args) => handle_cache(args, config).await,
    }
}

/// Initialize logging from the environment, the CLI flags and the config file
///
/// `MODPROXY_LOG` wins, then `RUST_LOG`, then the verbosity flags, then the
/// configured level.
fn init_logging(cli: &Cli, config: &AppConfig) {
    let filter = EnvFilter::try_from_env(env::LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter(config.logging.level.as_deref())));

    fmt().with_env_filter(filter).with_target(false).init();
}
