//! Cache statistics and disk usage
//!
//! Counts modules, entries and bytes in the cache tree. Used by the
//! `cache stats` command so an external janitor can decide what to evict.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::constants::cache;

/// Snapshot of the cache tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Cache root directory
    pub cache_root: PathBuf,
    /// Number of distinct modules with at least one version directory
    pub module_count: usize,
    /// Number of installed entries (module, version)
    pub entry_count: usize,
    /// Total size of installed artifacts in bytes
    pub total_bytes: u64,
    /// Leftover scratch or staged directories
    pub staging_items: usize,
}

impl CacheStats {
    /// Create empty statistics for `cache_root`
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            ..Default::default()
        }
    }

    /// Format total cache size in human-readable form
    pub fn format_total_size(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache root:    {}", self.cache_root.display())?;
        writeln!(f, "Modules:       {}", self.module_count)?;
        writeln!(f, "Entries:       {}", self.entry_count)?;
        writeln!(f, "Total size:    {}", self.format_total_size())?;
        write!(f, "Staging items: {}", self.staging_items)
    }
}

/// Directory scanner for cache statistics
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Scan the cache tree without blocking the async runtime
    pub async fn scan_cache_directory(cache_root: &Path) -> CacheStats {
        let cache_root = cache_root.to_path_buf();
        let fallback = CacheStats::new(cache_root.clone());

        tokio::task::spawn_blocking(move || Self::scan_sync(&cache_root))
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to scan cache directory: {}", e);
                fallback
            })
    }

    /// Scan the cache tree on the current thread
    pub fn scan_sync(cache_root: &Path) -> CacheStats {
        let mut stats = CacheStats::new(cache_root.to_path_buf());

        let walker = WalkDir::new(cache_root).min_depth(1).into_iter();
        let walker = walker.filter_entry(|entry| {
            !(entry.depth() == 1 && entry.file_name() == cache::STAGING_DIR)
        });

        for entry in walker.flatten() {
            let file_type = entry.file_type();
            if file_type.is_dir() {
                if entry.file_name() == cache::VERSIONS_DIR {
                    stats.module_count += 1;
                } else if Self::parent_is_versions_dir(entry.path()) {
                    stats.entry_count += 1;
                }
            } else if file_type.is_file() {
                if let Ok(metadata) = entry.metadata() {
                    stats.total_bytes += metadata.len();
                }
            }
        }

        stats.staging_items = std::fs::read_dir(cache_root.join(cache::STAGING_DIR))
            .map(|entries| entries.flatten().count())
            .unwrap_or(0);

        stats
    }

    fn parent_is_versions_dir(path: &Path) -> bool {
        path.parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name == cache::VERSIONS_DIR)
    }
}

/// Format bytes in human-readable format
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
