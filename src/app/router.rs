//! Request validation and endpoint routing
//!
//! Paths are matched against the protocol endpoint shapes by hand rather
//! than with route patterns, because module paths span any number of
//! segments. Requests outside the configured source namespace are rejected
//! before anything is decoded.

use axum::http::Method;
use tracing::debug;

use crate::app::models::{ArtifactKind, ModulePath, Version};
use crate::constants::protocol;
use crate::errors::{AppError, RouteError};

/// Endpoint addressed by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `{module}/@v/list`
    List,
    /// `{module}/@latest`
    Latest,
    /// `{module}/@v/{version}.{info,mod,zip}`
    Artifact {
        version: Version,
        kind: ArtifactKind,
    },
}

/// A validated, decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub module: ModulePath,
    pub endpoint: Endpoint,
}

/// Matches inbound paths to protocol endpoints within one source namespace
#[derive(Debug, Clone)]
pub struct RequestRouter {
    namespace: ModulePath,
    escaped_namespace: String,
}

impl RequestRouter {
    /// Create a router serving modules at or below `namespace`
    pub fn new(namespace: ModulePath) -> Self {
        let escaped_namespace = namespace.escaped();
        Self {
            namespace,
            escaped_namespace,
        }
    }

    /// The source namespace this router serves
    pub fn namespace(&self) -> &ModulePath {
        &self.namespace
    }

    /// Validate and decode a request
    ///
    /// Checks run in a fixed order: namespace (404), method (404), endpoint
    /// shape (400), escaping of module and version (400).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Route` or `AppError::Codec` describing the rejection
    pub fn route(&self, method: &Method, path: &str) -> Result<ProxyRequest, AppError> {
        let rest = path.strip_prefix('/').unwrap_or(path);

        if !self.in_namespace(rest) {
            debug!("Rejecting request outside namespace: {}", path);
            return Err(RouteError::NamespaceRejected {
                path: path.to_string(),
            }
            .into());
        }

        if method != Method::GET {
            return Err(RouteError::MethodNotServed {
                method: method.to_string(),
            }
            .into());
        }

        let (escaped_module, endpoint) =
            split_endpoint(rest).ok_or_else(|| RouteError::UnsupportedShape {
                path: path.to_string(),
            })?;

        let module = ModulePath::from_escaped(escaped_module)?;
        if !module.is_within(&self.namespace) {
            return Err(RouteError::NamespaceRejected {
                path: path.to_string(),
            }
            .into());
        }

        let endpoint = match endpoint {
            RawEndpoint::List => Endpoint::List,
            RawEndpoint::Latest => Endpoint::Latest,
            RawEndpoint::Artifact { version, kind } => Endpoint::Artifact {
                version: Version::from_escaped(version)?,
                kind,
            },
        };

        Ok(ProxyRequest { module, endpoint })
    }

    fn in_namespace(&self, rest: &str) -> bool {
        rest.strip_prefix(self.escaped_namespace.as_str())
            .is_some_and(|tail| tail.starts_with('/'))
    }
}

enum RawEndpoint<'a> {
    List,
    Latest,
    Artifact { version: &'a str, kind: ArtifactKind },
}

fn split_endpoint(rest: &str) -> Option<(&str, RawEndpoint<'_>)> {
    if let Some(module) = rest.strip_suffix(protocol::LIST_SUFFIX) {
        return non_empty(module).map(|m| (m, RawEndpoint::List));
    }
    if let Some(module) = rest.strip_suffix(protocol::LATEST_SUFFIX) {
        return non_empty(module).map(|m| (m, RawEndpoint::Latest));
    }

    let marker = rest.rfind(protocol::VERSION_MARKER)?;
    let module = non_empty(&rest[..marker])?;
    let file = &rest[marker + protocol::VERSION_MARKER.len()..];
    let (version, ext) = file.rsplit_once('.')?;
    let kind = ArtifactKind::from_extension(ext)?;
    if version.is_empty() || version.contains('/') {
        return None;
    }
    Some((module, RawEndpoint::Artifact { version, kind }))
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
