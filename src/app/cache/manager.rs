//! Core cache manager with atomic installation
//!
//! Entries are assembled in a staging directory on the same filesystem as
//! the cache and become visible with a single directory rename, so a reader
//! either sees all three artifacts of one fetch or nothing at all.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::app::models::{ArtifactKind, CacheKey, InfoRecord};
use crate::constants::cache;
use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::path::PathGenerator;
use super::stats::{CacheStats, DirectoryScanner};

/// An opened cached artifact ready for streaming
#[derive(Debug)]
pub struct CachedArtifact {
    /// Open handle; stays valid even if the entry is replaced meanwhile
    pub file: fs::File,
    /// Size in bytes
    pub len: u64,
    /// Location the handle was opened from
    pub path: PathBuf,
}

/// A cache entry being assembled in the staging area
///
/// Dropping a staged entry that was never installed deletes it.
#[derive(Debug)]
pub struct StagedEntry {
    key: CacheKey,
    dir: TempDir,
}

impl StagedEntry {
    /// Key this entry will be installed under
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Staging directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the artifact of `kind` must be written
    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir
            .path()
            .join(PathGenerator::artifact_file_name(&self.key.version, kind))
    }

    /// Write the `.info` artifact
    pub async fn write_info(&self, record: &InfoRecord) -> CacheResult<()> {
        let body = serde_json::to_vec(record)?;
        let path = self.artifact_path(ArtifactKind::Info);
        fs::write(&path, body)
            .await
            .map_err(|e| CacheError::io(format!("writing {}", path.display()), e))
    }

    /// Write the `.mod` artifact
    pub async fn write_descriptor(&self, content: &[u8]) -> CacheResult<()> {
        let path = self.artifact_path(ArtifactKind::Descriptor);
        fs::write(&path, content)
            .await
            .map_err(|e| CacheError::io(format!("writing {}", path.display()), e))
    }

    async fn missing_artifacts(&self) -> Vec<ArtifactKind> {
        let mut missing = Vec::new();
        for kind in ArtifactKind::ALL {
            if !fs::try_exists(self.artifact_path(kind))
                .await
                .unwrap_or(false)
            {
                missing.push(kind);
            }
        }
        missing
    }
}

/// Main cache management system
#[derive(Debug)]
pub struct CacheManager {
    /// Configuration
    config: CacheConfig,
    /// Cache root directory
    cache_root: PathBuf,
    /// Scratch and staging area inside the cache root
    staging_root: PathBuf,
}

impl CacheManager {
    /// Create a new cache manager
    ///
    /// Creates the cache root and staging area if needed and removes
    /// anything a previous process left in the staging area.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache configuration
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if cache directory cannot be created or accessed
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let cache_root = config.cache_root.clone();
        let staging_root = PathGenerator::staging_root(&cache_root);

        Self::ensure_directory_exists(&cache_root).await?;
        Self::ensure_directory_exists(&staging_root).await?;
        let purged = Self::purge_staging(&staging_root).await;
        if purged > 0 {
            warn!("Removed {} leftover staging directories", purged);
        }

        info!(
            "Initialized cache manager with root: {}",
            cache_root.display()
        );
        match config.mutable_ref_ttl {
            Some(ttl) => info!("Entries for branch versions refresh after {:?}", ttl),
            None => debug!("Entries for branch versions never refresh"),
        }

        Ok(Self {
            config,
            cache_root,
            staging_root,
        })
    }

    /// Get the cache root directory
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory of the entry for `key`
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        PathGenerator::entry_dir(&self.cache_root, key)
    }

    /// Ensure a directory exists, creating it if necessary
    async fn ensure_directory_exists(path: &Path) -> CacheResult<()> {
        fs::create_dir_all(path).await.map_err(|e| {
            error!("Failed to create cache directory {}: {}", path.display(), e);
            CacheError::DirectoryNotAccessible {
                path: path.to_path_buf(),
            }
        })
    }

    async fn purge_staging(staging_root: &Path) -> usize {
        let mut purged = 0;
        let Ok(mut entries) = fs::read_dir(staging_root).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => purged += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        purged
    }

    /// Locate the artifact of `kind` for `key`
    ///
    /// Returns `None` on a miss: the entry is absent, or it is backed by a
    /// mutable version and older than the configured refresh age.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the entry exists but cannot be inspected
    pub async fn probe(&self, key: &CacheKey, kind: ArtifactKind) -> CacheResult<Option<PathBuf>> {
        let entry_dir = self.entry_dir(key);
        let metadata = match fs::metadata(&entry_dir).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::io(
                    format!("inspecting {}", entry_dir.display()),
                    e,
                ))
            }
        };

        if self.is_stale(key, &metadata) {
            debug!("Entry {} is older than the refresh age", key);
            return Ok(None);
        }

        let path = PathGenerator::artifact_path(&self.cache_root, key, kind);
        match fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => Ok(None),
            Err(e) => Err(CacheError::io(format!("inspecting {}", path.display()), e)),
        }
    }

    /// Whether a fresh, complete entry exists for `key`
    pub async fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.probe(key, ArtifactKind::Info).await?.is_some())
    }

    /// Probe and open the artifact of `kind` for `key`
    ///
    /// An entry replaced between probe and open counts as a miss.
    pub async fn open(
        &self,
        key: &CacheKey,
        kind: ArtifactKind,
    ) -> CacheResult<Option<CachedArtifact>> {
        let Some(path) = self.probe(key, kind).await? else {
            return Ok(None);
        };

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(format!("opening {}", path.display()), e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| CacheError::io(format!("inspecting {}", path.display()), e))?
            .len();

        Ok(Some(CachedArtifact { file, len, path }))
    }

    fn is_stale(&self, key: &CacheKey, metadata: &std::fs::Metadata) -> bool {
        if key.version.is_immutable() {
            return false;
        }
        let Some(ttl) = self.config.mutable_ref_ttl else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > ttl)
            .unwrap_or(false)
    }

    /// Create an empty staging directory for a new entry of `key`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be created
    pub fn stage(&self, key: &CacheKey) -> CacheResult<StagedEntry> {
        let dir = tempfile::Builder::new()
            .prefix(cache::STAGED_PREFIX)
            .tempdir_in(&self.staging_root)
            .map_err(|e| CacheError::io("creating staging directory", e))?;
        Ok(StagedEntry {
            key: key.clone(),
            dir,
        })
    }

    /// Create a scratch workspace, deleted when dropped
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be created
    pub fn scratch(&self) -> CacheResult<TempDir> {
        tempfile::Builder::new()
            .prefix(cache::SCRATCH_PREFIX)
            .tempdir_in(&self.staging_root)
            .map_err(|e| CacheError::io("creating scratch workspace", e))
    }

    /// Atomically make a staged entry visible
    ///
    /// An existing entry for the same key is replaced: it is moved into the
    /// staging area, the new entry is renamed into place, then the old one
    /// is deleted.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::IncompleteEntry` if an artifact is missing, or
    /// `CacheError::InstallFailed` if the rename fails
    pub async fn install(&self, staged: StagedEntry) -> CacheResult<PathBuf> {
        let missing = staged.missing_artifacts().await;
        if !missing.is_empty() {
            return Err(CacheError::IncompleteEntry {
                key: staged.key.to_string(),
                missing: missing
                    .iter()
                    .map(|k| k.extension())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let entry_dir = self.entry_dir(&staged.key);
        if let Some(parent) = entry_dir.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", parent.display()), e))?;
        }

        match fs::rename(staged.path(), &entry_dir).await {
            Ok(()) => {
                debug!("Installed {} at {}", staged.key, entry_dir.display());
            }
            Err(_) if fs::try_exists(&entry_dir).await.unwrap_or(false) => {
                self.replace(&staged, &entry_dir).await?;
                debug!("Replaced {} at {}", staged.key, entry_dir.display());
            }
            Err(e) => {
                return Err(CacheError::InstallFailed {
                    staged: staged.path().to_path_buf(),
                    entry: entry_dir,
                    source: e,
                })
            }
        }

        // The staging directory no longer exists, so dropping it is a no-op.
        drop(staged);
        Ok(entry_dir)
    }

    async fn replace(&self, staged: &StagedEntry, entry_dir: &Path) -> CacheResult<()> {
        let retired = tempfile::Builder::new()
            .prefix(cache::RETIRED_PREFIX)
            .tempdir_in(&self.staging_root)
            .map_err(|e| CacheError::io("creating retirement directory", e))?;
        let retired_entry = retired.path().join("entry");

        fs::rename(entry_dir, &retired_entry)
            .await
            .map_err(|e| CacheError::InstallFailed {
                staged: staged.path().to_path_buf(),
                entry: entry_dir.to_path_buf(),
                source: e,
            })?;

        if let Err(e) = fs::rename(staged.path(), entry_dir).await {
            if let Err(restore) = fs::rename(&retired_entry, entry_dir).await {
                error!(
                    "Failed to restore previous entry at {}: {}",
                    entry_dir.display(),
                    restore
                );
            }
            return Err(CacheError::InstallFailed {
                staged: staged.path().to_path_buf(),
                entry: entry_dir.to_path_buf(),
                source: e,
            });
        }

        tokio::task::spawn_blocking(move || drop(retired));
        Ok(())
    }

    /// Get cache statistics
    pub async fn get_cache_stats(&self) -> CacheStats {
        DirectoryScanner::scan_cache_directory(&self.cache_root).await
    }
}
