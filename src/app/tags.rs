//! Tag listing against the destination host
//!
//! Answers the `list` endpoint and selects the target of `@latest`. Results
//! are never cached: the set of tags may change between two requests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::models::{ModulePath, Version};
use crate::app::vcs::{RefKind, RemoteResolver, VersionControl};
use crate::errors::{AppError, VcsError};

/// Lists version tags of modules through the version-control capability
#[derive(Clone)]
pub struct TagLister {
    vcs: Arc<dyn VersionControl>,
    resolver: RemoteResolver,
    list_timeout: Duration,
}

impl TagLister {
    /// Create a new tag lister
    ///
    /// # Arguments
    ///
    /// * `vcs` - Version-control backend used for `list_tags`
    /// * `resolver` - Maps module paths to destination repositories
    /// * `list_timeout` - Ceiling for one listing round trip
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        resolver: RemoteResolver,
        list_timeout: Duration,
    ) -> Self {
        Self {
            vcs,
            resolver,
            list_timeout,
        }
    }

    /// Distinct tag names of `module`, in sorted order
    ///
    /// Branch and other refs are dropped, as are tag names that could not be
    /// requested as a version (characters outside `[A-Za-z0-9-._~+]`, such
    /// as `@` or `,`). Such a tag has no `@v/{version}` address, so listing
    /// it would advertise a version every artifact request rejects with 400.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Listing` carrying the underlying failure (answered
    /// as 404)
    pub async fn list(&self, module: &ModulePath) -> Result<BTreeSet<String>, AppError> {
        let listing_error = |source: VcsError| AppError::Listing {
            module: module.to_string(),
            source,
        };

        let remote = self.resolver.resolve(module).map_err(listing_error)?;
        debug!("Listing tags of {} via {}", module, remote);

        let refs = tokio::time::timeout(self.list_timeout, self.vcs.list_tags(&remote))
            .await
            .map_err(|_| {
                listing_error(VcsError::TimedOut {
                    operation: format!("listing tags of {}", remote),
                    seconds: self.list_timeout.as_secs(),
                })
            })?
            .map_err(|e| {
                warn!("Tag listing failed for {}: {}", module, e);
                listing_error(e)
            })?;

        let tags: BTreeSet<String> = refs
            .into_iter()
            .filter(|r| r.kind == RefKind::Tag)
            .filter_map(|r| match Version::new(r.name.as_str()) {
                Ok(_) => Some(r.name),
                Err(e) => {
                    debug!("Skipping unusable tag {:?}: {}", r.name, e);
                    None
                }
            })
            .collect();

        debug!("{} has {} tags", module, tags.len());
        Ok(tags)
    }

    /// Highest semantic version tag of `module`
    ///
    /// # Errors
    ///
    /// Returns `AppError::Listing` if listing fails, or `AppError::NoVersions`
    /// if no tag is a semantic version
    pub async fn latest(&self, module: &ModulePath) -> Result<Version, AppError> {
        let tags = self.list(module).await?;
        select_latest(tags.iter().map(String::as_str)).ok_or_else(|| AppError::NoVersions {
            module: module.to_string(),
        })
    }
}

/// Pick the highest semantic version, preferring releases over pre-releases
///
/// Names that are not `v`-prefixed semantic versions are ignored.
pub fn select_latest<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<Version> {
    let mut best_release: Option<(semver::Version, Version)> = None;
    let mut best_pre: Option<(semver::Version, Version)> = None;

    for tag in tags {
        let Ok(version) = Version::new(tag) else {
            continue;
        };
        let Some(parsed) = version.semver() else {
            continue;
        };

        let slot = if parsed.pre.is_empty() {
            &mut best_release
        } else {
            &mut best_pre
        };
        if slot.as_ref().map_or(true, |(current, _)| parsed > *current) {
            *slot = Some((parsed, version));
        }
    }

    best_release.or(best_pre).map(|(_, version)| version)
}
