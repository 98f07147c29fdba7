//! Cache store addressed by (module, version)
//!
//! Each entry holds the three artifacts of one version: the `.info` record,
//! the `.mod` descriptor and the `.zip` archive. Entries are written only by
//! the fetcher and become visible atomically; readers need no locking.
//!
//! # Key Features
//!
//! - **Atomic installation**: entries are staged and renamed into place whole
//! - **Atomic replacement**: stale branch entries are swapped, never edited
//! - **Refresh policy**: semantic version tags are permanent, branch entries
//!   optionally expire after a configured age (judged by directory mtime)
//! - **Stable layout**: `{root}/{module}/@v/{version}/{version}.{ext}`
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types
//! - [`path`] - Cache path layout
//! - [`stats`] - Cache statistics and disk usage
//! - [`manager`] - Probe, staging and atomic installation

pub mod config;
pub mod manager;
pub mod path;
pub mod stats;

// Re-export main public API
pub use config::CacheConfig;
pub use manager::{CacheManager, CachedArtifact, StagedEntry};
pub use path::PathGenerator;
pub use stats::{CacheStats, DirectoryScanner};
