//! Error types for modproxy
//!
//! This module defines the error families for every stage of the request
//! pipeline. Each request-facing error maps to exactly one HTTP status via
//! [`AppError::status_code`], so handlers never decide statuses ad hoc.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// Name codec errors (malformed escaping or invalid identifiers)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Escaped input that no valid encoding could have produced
    #[error("invalid escaped {what} {input:?}")]
    InvalidEscape { what: &'static str, input: String },

    /// Decoded module path violates the module path rules
    #[error("malformed module path {path:?}: {reason}")]
    InvalidModulePath { path: String, reason: String },

    /// Decoded version violates the version element rules
    #[error("malformed version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// Request routing errors raised before any decoding happens
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Path is outside the configured source namespace
    #[error("{path} is ignored")]
    NamespaceRejected { path: String },

    /// Only GET is served
    #[error("method {method} is not served")]
    MethodNotServed { method: String },

    /// Path does not match any protocol endpoint shape
    #[error("unsupported endpoint: {path}")]
    UnsupportedShape { path: String },
}

/// Version-control capability errors
#[derive(Error, Debug)]
pub enum VcsError {
    /// The version-control binary could not be started
    #[error("failed to run {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The destination host rejected our credentials
    #[error("authentication failed for {remote}: {stderr}")]
    AuthenticationFailed { remote: String, stderr: String },

    /// The destination repository does not exist
    #[error("repository not found: {remote}")]
    RepositoryNotFound { remote: String },

    /// The requested ref does not exist on the destination repository
    #[error("unknown revision {reference} in {remote}")]
    RefNotFound { remote: String, reference: String },

    /// Any other non-zero exit of the version-control command
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Destination address could not be built
    #[error("invalid remote address: {reason}")]
    InvalidRemote { reason: String },

    /// Commit timestamp could not be parsed
    #[error("invalid commit timestamp {value:?}")]
    InvalidTimestamp { value: String },

    /// The operation did not finish within its deadline
    #[error("{operation} timed out after {seconds} seconds")]
    TimedOut { operation: String, seconds: u64 },

    /// Archive assembly failed
    #[error("archive creation failed: {reason}")]
    Archive { reason: String },

    /// Local I/O during a version-control operation
    #[error("I/O error during version-control operation")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Whether the destination host definitively answered "no such thing"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VcsError::RefNotFound { .. } | VcsError::RepositoryNotFound { .. }
        )
    }
}

/// Cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Filesystem operation on the cache tree failed
    #[error("cache I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Atomic install of a staged entry failed
    #[error("atomic install failed: could not rename {staged} to {entry}")]
    InstallFailed {
        staged: PathBuf,
        entry: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A staged entry is missing artifacts and cannot be installed
    #[error("staged entry for {key} is incomplete, missing: {missing}")]
    IncompleteEntry { key: String, missing: String },

    /// Info record could not be encoded
    #[error("failed to encode info record")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Outcome of one failed fetch attempt
///
/// Cloneable so that every request waiting on the same in-flight fetch
/// observes the identical error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The destination host has no such repository or ref
    #[error("{module}@{version}: {reason}")]
    NotFound {
        module: String,
        version: String,
        reason: String,
    },

    /// Network or authentication failure talking to the destination host
    #[error("{module}@{version}: upstream failure: {reason}")]
    Upstream {
        module: String,
        version: String,
        reason: String,
    },

    /// Local failure while materialising the entry
    #[error("{module}@{version}: {reason}")]
    Internal {
        module: String,
        version: String,
        reason: String,
    },

    /// The fetch exceeded its own execution ceiling and was abandoned
    #[error("{module}@{version}: fetch timed out after {seconds} seconds")]
    TimedOut {
        module: String,
        version: String,
        seconds: u64,
    },
}

impl FetchError {
    /// Classify a version-control failure for the given key
    pub fn from_vcs(module: &str, version: &str, error: &VcsError) -> Self {
        let reason = error.to_string();
        let (module, version) = (module.to_string(), version.to_string());
        match error {
            e if e.is_not_found() => FetchError::NotFound {
                module,
                version,
                reason,
            },
            VcsError::Io(_)
            | VcsError::Spawn { .. }
            | VcsError::Archive { .. }
            | VcsError::InvalidRemote { .. } => FetchError::Internal {
                module,
                version,
                reason,
            },
            _ => FetchError::Upstream {
                module,
                version,
                reason,
            },
        }
    }

    /// Classify a cache failure for the given key
    pub fn from_cache(module: &str, version: &str, error: &CacheError) -> Self {
        FetchError::Internal {
            module: module.to_string(),
            version: version.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Missing required configuration field
    #[error("missing required configuration field: {field} (set {hint})")]
    MissingField { field: String, hint: String },

    /// Invalid configuration value
    #[error("invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed module or version escaping
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Request rejected by the router
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Tag listing against the destination host failed
    #[error("listing versions of {module}: {source}")]
    Listing {
        module: String,
        #[source]
        source: VcsError,
    },

    /// Module has no usable versions (e.g. @latest with no semver tags)
    #[error("no versions found for {module}")]
    NoVersions { module: String },

    /// Fetch triggered by an artifact request failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request waited longer than its ceiling
    #[error("request timed out after {seconds} seconds, retry later")]
    RequestTimeout { seconds: u64 },

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// HTTP status this error is answered with
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Codec(_) => StatusCode::BAD_REQUEST,
            AppError::Route(RouteError::UnsupportedShape { .. }) => StatusCode::BAD_REQUEST,
            AppError::Route(_) => StatusCode::NOT_FOUND,
            AppError::Listing { .. } | AppError::NoVersions { .. } => StatusCode::NOT_FOUND,
            AppError::Fetch(FetchError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Fetch(FetchError::TimedOut { .. }) | AppError::RequestTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::Fetch(_)
            | AppError::Cache(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Generic { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the error is recoverable (a later retry may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::RequestTimeout { .. }
                | AppError::Fetch(FetchError::TimedOut { .. })
                | AppError::Fetch(FetchError::Upstream { .. })
                | AppError::Listing { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Codec(_) => "validation",
            AppError::Route(RouteError::NamespaceRejected { .. }) => "namespace",
            AppError::Route(_) => "validation",
            AppError::Listing { .. } | AppError::NoVersions { .. } => "listing",
            AppError::Fetch(FetchError::NotFound { .. }) => "not_found",
            AppError::Fetch(FetchError::Upstream { .. }) => "upstream",
            AppError::Fetch(_) => "fetch",
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::RequestTimeout { .. } => "timeout",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Codec result type alias
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Version-control result type alias
pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
