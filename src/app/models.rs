//! Data models for modproxy
//!
//! This module defines the identifiers the request pipeline passes around:
//! validated module paths and versions, the cache key built from them, the
//! artifact kinds an entry holds, and the info record served for `.info`.

use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::app::codec;
use crate::constants::http;
use crate::errors::CodecResult;

/// A validated, decoded module path (e.g. `example.com/Team/pkg`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(String);

impl ModulePath {
    /// Validate a decoded module path
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidModulePath` if `path` breaks the module path rules
    pub fn new(path: impl Into<String>) -> CodecResult<Self> {
        let path = path.into();
        codec::check_path(&path)?;
        Ok(Self(path))
    }

    /// Decode a module path as it appears in a request URL
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the escaping is malformed or the result is invalid
    pub fn from_escaped(escaped: &str) -> CodecResult<Self> {
        codec::unescape_path(escaped).map(Self)
    }

    /// The decoded path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The escaped form, safe as URL segments and directory names
    pub fn escaped(&self) -> String {
        // Validated on construction, so escaping cannot fail.
        codec::escape_path(&self.0).unwrap_or_else(|_| self.0.clone())
    }

    /// Final path element, used to name the destination repository
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this module lives at or below `namespace`
    pub fn is_within(&self, namespace: &ModulePath) -> bool {
        self.0 == namespace.0
            || self
                .0
                .strip_prefix(namespace.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated, decoded version: a semantic tag or a branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(String);

impl Version {
    /// Validate a decoded version
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidVersion` if `version` breaks the version rules
    pub fn new(version: impl Into<String>) -> CodecResult<Self> {
        let version = version.into();
        codec::check_version(&version)?;
        Ok(Self(version))
    }

    /// Decode a version as it appears in a request URL
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the escaping is malformed or the result is invalid
    pub fn from_escaped(escaped: &str) -> CodecResult<Self> {
        codec::unescape_version(escaped).map(Self)
    }

    /// The decoded version
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The escaped form, safe as a directory and file name
    pub fn escaped(&self) -> String {
        codec::escape_version(&self.0).unwrap_or_else(|_| self.0.clone())
    }

    /// Parse as a `v`-prefixed semantic version (`v1.2.3`, `v1.2.3-rc.1`)
    pub fn semver(&self) -> Option<semver::Version> {
        self.0
            .strip_prefix('v')
            .and_then(|rest| semver::Version::parse(rest).ok())
    }

    /// Semantic version tags are treated as immutable; anything else may move
    pub fn is_immutable(&self) -> bool {
        self.semver().is_some()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sole addressing scheme for on-disk storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub module: ModulePath,
    pub version: Version,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(module: ModulePath, version: Version) -> Self {
        Self { module, version }
    }

    /// Root directory prefix used inside the archive
    pub fn archive_prefix(&self) -> String {
        format!("{}@{}/", self.module, self.version)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.version)
    }
}

/// The three artifacts of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// `{Version, Time}` record
    Info,
    /// Raw module descriptor
    Descriptor,
    /// Source archive
    Archive,
}

impl ArtifactKind {
    /// All artifacts an entry must hold
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Info,
        ArtifactKind::Descriptor,
        ArtifactKind::Archive,
    ];

    /// Map an endpoint extension to an artifact kind
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "info" => Some(Self::Info),
            "mod" => Some(Self::Descriptor),
            "zip" => Some(Self::Archive),
            _ => None,
        }
    }

    /// Endpoint and on-disk file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Descriptor => "mod",
            Self::Archive => "zip",
        }
    }

    /// Content type the artifact is served with
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Info => http::CONTENT_TYPE_JSON,
            Self::Descriptor => http::CONTENT_TYPE_TEXT,
            Self::Archive => http::CONTENT_TYPE_ZIP,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Body of the `.info` artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRecord {
    #[serde(rename = "Version")]
    pub version: String,
    /// RFC 3339 commit timestamp, keeping the commit's own offset
    #[serde(rename = "Time")]
    pub time: String,
}

impl InfoRecord {
    /// Build the record for a version resolved to a commit at `time`
    pub fn new(version: &Version, time: DateTime<FixedOffset>) -> Self {
        Self {
            version: version.as_str().to_string(),
            time: time.to_rfc3339_opts(SecondsFormat::AutoSi, false),
        }
    }
}
