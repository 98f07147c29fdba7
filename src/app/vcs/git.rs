//! `git` command-line implementation of the version-control capability
//!
//! Every command runs non-interactively (no terminal prompts, no credential
//! helpers) and is killed if the awaiting future is dropped, so an abandoned
//! fetch never leaves a stray clone running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tokio::process::Command;
use tracing::debug;

use super::{RefKind, RemoteRef, RemoteRepo, VersionControl};
use crate::constants::vcs;
use crate::errors::{VcsError, VcsResult};

/// Version control through the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl GitCli {
    /// Create a git backend using `binary` (looked up on PATH if relative)
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "")
            .args(["-c", "credential.helper="])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a git command and return stdout, classifying failures
    async fn exec(
        &self,
        mut cmd: Command,
        command_line: &str,
        remote: Option<&RemoteRepo>,
    ) -> VcsResult<String> {
        debug!("Executing: {}", command_line);

        let output = cmd.output().await.map_err(|e| VcsError::Spawn {
            command: command_line.to_string(),
            source: e,
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = match remote {
            Some(remote) => remote.scrub(stderr.trim()),
            None => stderr.trim().to_string(),
        };
        Err(classify_failure(command_line, remote, stderr))
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(vcs::DEFAULT_GIT_BINARY)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn list_tags(&self, remote: &RemoteRepo) -> VcsResult<Vec<RemoteRef>> {
        let mut cmd = self.command();
        cmd.args(["ls-remote", "--tags", "--", remote.authenticated_url()]);
        let command_line = format!("git ls-remote --tags {}", remote);

        let stdout = self.exec(cmd, &command_line, Some(remote)).await?;
        Ok(parse_ls_remote(&stdout))
    }

    async fn checkout_ref(
        &self,
        remote: &RemoteRepo,
        reference: &str,
        dest: &Path,
    ) -> VcsResult<()> {
        let mut cmd = self.command();
        cmd.args(["clone", "--quiet", "--depth", "1", "--branch", reference, "--"])
            .arg(remote.authenticated_url())
            .arg(dest);
        let command_line = format!("git clone --branch {} {}", reference, remote);

        self.exec(cmd, &command_line, Some(remote))
            .await
            .map_err(|e| match e {
                VcsError::CommandFailed { stderr, .. } if is_missing_ref(&stderr) => {
                    VcsError::RefNotFound {
                        remote: remote.redacted(),
                        reference: reference.to_string(),
                    }
                }
                other => other,
            })?;
        Ok(())
    }

    async fn resolve_commit_time(&self, workdir: &Path) -> VcsResult<DateTime<FixedOffset>> {
        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(workdir)
            .args(["log", "-1", "--format=%cI", "HEAD"]);
        let command_line = format!("git -C {} log -1 --format=%cI", workdir.display());

        let stdout = self.exec(cmd, &command_line, None).await?;
        let value = stdout.trim();
        DateTime::parse_from_rfc3339(value).map_err(|_| VcsError::InvalidTimestamp {
            value: value.to_string(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "git"
    }
}

/// Parse `git ls-remote` output into structured refs
///
/// Each line is `<sha>\t<refname>`; anything else (warnings, blank lines)
/// is skipped. Peeled annotated-tag entries (`refs/tags/v1.0.0^{}`) are
/// reported under the tag they annotate.
pub fn parse_ls_remote(output: &str) -> Vec<RemoteRef> {
    output
        .lines()
        .filter_map(|line| {
            let (sha, refname) = line.split_once('\t')?;
            let refname = refname.trim_end();
            if sha.is_empty() || sha.contains(char::is_whitespace) || refname.contains('\t') {
                return None;
            }
            if refname != "HEAD" && !refname.starts_with("refs/") {
                return None;
            }
            let refname = refname.strip_suffix(vcs::PEELED_SUFFIX).unwrap_or(refname);

            let kind = if refname.starts_with("refs/tags/") {
                RefKind::Tag
            } else if refname.starts_with("refs/heads/") {
                RefKind::Branch
            } else {
                RefKind::Other
            };

            let name = refname.rsplit('/').next()?;
            if name.is_empty() {
                return None;
            }
            Some(RemoteRef {
                name: name.to_string(),
                kind,
            })
        })
        .collect()
}

fn is_missing_ref(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    (lower.contains("remote branch") && lower.contains("not found"))
        || lower.contains("couldn't find remote ref")
}

fn classify_failure(command: &str, remote: Option<&RemoteRepo>, stderr: String) -> VcsError {
    let lower = stderr.to_lowercase();
    let remote_name = remote.map(|r| r.redacted()).unwrap_or_default();

    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("403")
        || lower.contains("401")
    {
        VcsError::AuthenticationFailed {
            remote: remote_name,
            stderr,
        }
    } else if lower.contains("repository not found")
        || (lower.contains("repository") && lower.contains("does not exist"))
    {
        VcsError::RepositoryNotFound {
            remote: remote_name,
        }
    } else {
        VcsError::CommandFailed {
            command: command.to_string(),
            stderr,
        }
    }
}
