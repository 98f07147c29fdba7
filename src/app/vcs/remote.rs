//! Destination repository addresses
//!
//! A module `<namespace>/.../<name>` lives in repository `<name>` under the
//! configured destination root. Clone addresses carry the access token as
//! URL credentials, so they are only ever displayed redacted.

use std::fmt;

use url::Url;

use crate::app::models::ModulePath;
use crate::errors::{VcsError, VcsResult};

/// Authenticated address of one destination repository
#[derive(Clone)]
pub struct RemoteRepo {
    url: Url,
    secret: String,
}

impl RemoteRepo {
    /// Full address including credentials, for handing to the VCS client only
    pub fn authenticated_url(&self) -> &str {
        self.url.as_str()
    }

    /// Address with the password replaced by `***`
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if !self.secret.is_empty() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }

    /// Remove the secret from arbitrary text (e.g. VCS stderr)
    pub fn scrub(&self, text: &str) -> String {
        if self.secret.is_empty() {
            return text.to_string();
        }
        text.replace(&self.secret, "***")
    }
}

impl fmt::Display for RemoteRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for RemoteRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRepo")
            .field("url", &self.redacted())
            .finish()
    }
}

/// Derives destination addresses from module paths
#[derive(Clone)]
pub struct RemoteResolver {
    destination_root: String,
    user: String,
    token: String,
}

impl RemoteResolver {
    /// Create a resolver for `destination_root` (`host[/path]`, no scheme)
    pub fn new(
        destination_root: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            destination_root: destination_root.into().trim_end_matches('/').to_string(),
            user: user.into(),
            token: token.into(),
        }
    }

    /// Address of the repository backing `module`
    ///
    /// # Errors
    ///
    /// Returns `VcsError::InvalidRemote` if the address cannot be formed
    pub fn resolve(&self, module: &ModulePath) -> VcsResult<RemoteRepo> {
        let raw = format!(
            "https://{}/{}",
            self.destination_root,
            module.last_segment()
        );
        let mut url = Url::parse(&raw).map_err(|e| VcsError::InvalidRemote {
            reason: format!("{}: {}", raw, e),
        })?;

        if !self.token.is_empty() {
            url.set_username(&self.user)
                .and_then(|_| url.set_password(Some(&self.token)))
                .map_err(|_| VcsError::InvalidRemote {
                    reason: format!("cannot attach credentials to {}", raw),
                })?;
        }

        Ok(RemoteRepo {
            url,
            secret: self.token.clone(),
        })
    }
}

impl fmt::Debug for RemoteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResolver")
            .field("destination_root", &self.destination_root)
            .field("user", &self.user)
            .field("token", &"***")
            .finish()
    }
}
