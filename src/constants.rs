//! Application constants for modproxy
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names read by the configuration loader
pub mod env {
    /// Listen address (IP only)
    pub const LISTEN_ADDR: &str = "MODPROXY_LISTEN_ADDR";

    /// Listen port
    pub const PORT: &str = "MODPROXY_PORT";

    /// Local cache root
    pub const CACHE_DIR: &str = "MODPROXY_CACHE_DIR";

    /// Destination host token
    pub const TOKEN: &str = "MODPROXY_TOKEN";

    /// Token fallback accepted for compatibility with existing deployments
    pub const TOKEN_FALLBACK: &str = "GITHUB_TOKEN";

    /// User name paired with the token in clone addresses
    pub const GIT_USER: &str = "MODPROXY_GIT_USER";

    /// Source namespace prefix
    pub const SOURCE_NAMESPACE: &str = "MODPROXY_SOURCE_NAMESPACE";

    /// Destination host root, e.g. `github.com/acme`
    pub const DESTINATION_ROOT: &str = "MODPROXY_DESTINATION_ROOT";

    /// Per-request ceiling (humantime)
    pub const REQUEST_TIMEOUT: &str = "MODPROXY_REQUEST_TIMEOUT";

    /// Per-fetch ceiling (humantime)
    pub const FETCH_TIMEOUT: &str = "MODPROXY_FETCH_TIMEOUT";

    /// Global bound on concurrently running fetches
    pub const MAX_CONCURRENT_FETCHES: &str = "MODPROXY_MAX_CONCURRENT_FETCHES";

    /// Log filter directive
    pub const LOG: &str = "MODPROXY_LOG";
}

/// HTTP surface constants
pub mod http {
    /// Default listen address
    pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

    /// Cache-Control value sent on every response
    pub const NO_STORE: &str = "no-store";

    /// Content type of `.info` and `@latest` responses
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Content type of `.mod`, `list` and error responses
    pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=UTF-8";

    /// Content type of `.zip` responses
    pub const CONTENT_TYPE_ZIP: &str = "application/zip";
}

/// Protocol path markers
pub mod protocol {
    /// Separator between module path and version endpoint
    pub const VERSION_MARKER: &str = "/@v/";

    /// Suffix of the list endpoint
    pub const LIST_SUFFIX: &str = "/@v/list";

    /// Suffix of the latest endpoint
    pub const LATEST_SUFFIX: &str = "/@latest";

    /// Escape marker preceding a lowercased uppercase letter
    pub const ESCAPE_MARKER: char = '!';
}

/// Fetch execution limits
pub mod fetch {
    use super::Duration;

    /// Default ceiling for a request waiting on listing or fetch
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// Default ceiling for a remote tag listing
    pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default ceiling for one fetch (checkout + archive)
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

    /// Default global bound on simultaneously running fetches
    pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

    /// Upper bound accepted for the fetch concurrency setting
    pub const MAX_CONCURRENT_FETCHES_LIMIT: usize = 256;
}

/// Version-control defaults
pub mod vcs {
    /// Git binary looked up on PATH
    pub const DEFAULT_GIT_BINARY: &str = "git";

    /// User name paired with the token in clone addresses
    pub const DEFAULT_GIT_USER: &str = "x-access-token";

    /// Directory name skipped when archiving a working tree
    pub const METADATA_DIR: &str = ".git";

    /// Suffix git appends to peeled annotated tag refs
    pub const PEELED_SUFFIX: &str = "^{}";
}

/// Cache layout constants
pub mod cache {
    /// Directory holding scratch workspaces and staged entries
    pub const STAGING_DIR: &str = ".staging";

    /// Per-module directory that holds version entries
    pub const VERSIONS_DIR: &str = "@v";

    /// Name prefix of staged entry directories
    pub const STAGED_PREFIX: &str = "entry-";

    /// Name prefix of scratch checkout workspaces
    pub const SCRATCH_PREFIX: &str = "work-";

    /// Name prefix of replaced entries awaiting deletion
    pub const RETIRED_PREFIX: &str = "retired-";

    /// Default module descriptor file name at the repository root
    pub const DEFAULT_DESCRIPTOR_FILE: &str = "go.mod";
}
