//! Cache path generation
//!
//! Layout: `{cache_root}/{escaped module}/@v/{escaped version}/{escaped version}.{ext}`.
//! Escaped module elements never start with `.` and never contain `@`, so
//! module directories cannot collide with `.staging` or the `@v` marker.

use std::path::{Path, PathBuf};

use crate::app::models::{ArtifactKind, CacheKey, ModulePath, Version};
use crate::constants::cache;

/// Path generation utility for cache entries
pub struct PathGenerator;

impl PathGenerator {
    /// Directory holding all cached versions of `module`
    pub fn module_dir(cache_root: &Path, module: &ModulePath) -> PathBuf {
        let mut path = cache_root.to_path_buf();
        for element in module.escaped().split('/') {
            path.push(element);
        }
        path.push(cache::VERSIONS_DIR);
        path
    }

    /// Directory of one cache entry
    pub fn entry_dir(cache_root: &Path, key: &CacheKey) -> PathBuf {
        Self::module_dir(cache_root, &key.module).join(key.version.escaped())
    }

    /// File name of one artifact inside an entry directory
    pub fn artifact_file_name(version: &Version, kind: ArtifactKind) -> String {
        format!("{}.{}", version.escaped(), kind.extension())
    }

    /// Full path of one artifact
    pub fn artifact_path(cache_root: &Path, key: &CacheKey, kind: ArtifactKind) -> PathBuf {
        Self::entry_dir(cache_root, key).join(Self::artifact_file_name(&key.version, kind))
    }

    /// Directory for scratch workspaces and staged entries
    pub fn staging_root(cache_root: &Path) -> PathBuf {
        cache_root.join(cache::STAGING_DIR)
    }
}
