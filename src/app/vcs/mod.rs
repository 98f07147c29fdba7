//! Version-control capability
//!
//! The tag lister and the fetcher never shell out themselves; they talk to a
//! [`VersionControl`] implementation. Production uses [`GitCli`], tests plug
//! in fakes that count invocations.
//!
//! # Module Organization
//!
//! - [`remote`] - destination repository addresses derived from module paths
//! - [`git`] - `git` command-line implementation

pub mod git;
pub mod remote;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::app::archive;
use crate::errors::{VcsError, VcsResult};

pub use git::{parse_ls_remote, GitCli};
pub use remote::{RemoteRepo, RemoteResolver};

/// Kind of a remote ref
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// `refs/tags/*`
    Tag,
    /// `refs/heads/*`
    Branch,
    /// Anything else (`HEAD`, `refs/pull/*`, ...)
    Other,
}

/// A ref advertised by the destination host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    /// Final path segment of the ref, e.g. `v1.0.0` for `refs/tags/v1.0.0`
    pub name: String,
    /// Kind of the ref
    pub kind: RefKind,
}

impl RemoteRef {
    /// Create a tag ref
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RefKind::Tag,
        }
    }

    /// Create a branch ref
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RefKind::Branch,
        }
    }
}

/// Abstract version-control interface
///
/// Implementations must be cheap to share across requests; every method may
/// be called concurrently for different keys.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// List the tag refs advertised by `remote`
    async fn list_tags(&self, remote: &RemoteRepo) -> VcsResult<Vec<RemoteRef>>;

    /// Check out exactly `reference` (tag or branch) of `remote` into `dest`
    ///
    /// `dest` does not exist yet; implementations create it.
    async fn checkout_ref(&self, remote: &RemoteRepo, reference: &str, dest: &Path)
        -> VcsResult<()>;

    /// Commit timestamp of the checked-out ref, with its original offset
    async fn resolve_commit_time(&self, workdir: &Path) -> VcsResult<DateTime<FixedOffset>>;

    /// Write a zip of `workdir` rooted at `prefix` to `dest`, skipping VCS metadata
    ///
    /// Returns the number of files archived.
    async fn create_archive(&self, workdir: &Path, prefix: &str, dest: &Path) -> VcsResult<usize> {
        let (workdir, prefix, dest): (PathBuf, String, PathBuf) =
            (workdir.to_path_buf(), prefix.to_string(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || archive::write_module_zip(&workdir, &prefix, &dest))
            .await
            .map_err(|e| VcsError::Archive {
                reason: format!("archive task failed: {}", e),
            })?
    }

    /// Human-readable backend name for logs
    fn backend_name(&self) -> &'static str;
}
