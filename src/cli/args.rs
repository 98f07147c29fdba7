//! Command-line argument parsing for modproxy
//!
//! This module defines the CLI structure using clap derive macros: the
//! `serve` command runs the proxy, `cache` inspects the on-disk cache.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

/// modproxy - caching module proxy backed by a git host
#[derive(Parser, Debug)]
#[command(
    name = "modproxy",
    version,
    about = "Caching module proxy backed by a git host",
    long_about = "Answers module-protocol requests (list, info, mod, zip) for a source namespace by
listing tags and checking out refs of repositories on a destination git host, caching the
results on local disk."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the proxy server
    Serve(ServeArgs),

    /// Inspect the module cache
    Cache(CacheArgs),
}

/// Arguments for the serve command
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<IpAddr>,

    /// Cache directory path
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Module path prefix to serve, e.g. `example.com/acme`
    #[arg(long, value_name = "PREFIX")]
    pub source_namespace: Option<String>,

    /// Destination host root, e.g. `github.com/acme`
    #[arg(long, value_name = "HOST[/PATH]")]
    pub destination_root: Option<String>,
}

impl ServeArgs {
    /// Flags given on the command line, as configuration overrides
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            listen_addr: self.listen,
            cache_dir: self.cache_dir.clone(),
            source_namespace: self.source_namespace.clone(),
            destination_root: self.destination_root.clone(),
        }
    }
}

/// Arguments for cache inspection
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache directory path
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache inspection actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show module, entry and size counts
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Filter directive from the verbosity flags, falling back to `configured`
    pub fn log_filter(&self, configured: Option<&str>) -> String {
        if self.global.quiet {
            return "modproxy=error".to_string();
        }
        match self.global.verbose {
            0 => configured.unwrap_or("modproxy=info").to_string(),
            1 => "modproxy=debug".to_string(),
            _ => "modproxy=trace".to_string(),
        }
    }
}
