//! `Vcs` implementation backed by the git executable and libgit2
//!
//! Network-facing operations (clone, fetch, checkout, update-server-info) run
//! the git executable with a bounded timeout. Local ref reads and writes go
//! through libgit2 so the on-disk ref format stays git's business.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use git2::{Oid, Repository};
use tokio::process::Command;
use tracing::debug;

use super::{CloneOutcome, Vcs, VcsError, PINNED_BRANCH};
use crate::config::GitConfig;

/// Diagnostic git prints when cloning into a populated directory
const DESTINATION_NOT_EMPTY: &str = "already exists and is not an empty directory";

/// Runs git operations against working copies on disk
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Path to the git executable
    binary: String,
    /// Upper bound for each invocation
    timeout: Duration,
}

impl GitCli {
    /// Create a runner with a specific executable and timeout
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Create a runner from configuration
    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(config.binary.clone(), config.timeout)
    }

    /// Run git with `args` in `dir`, returning the output whatever the exit status
    async fn run(&self, op: &'static str, dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            // stable diagnostics, and never wait for credentials
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(op, dir = %dir.display(), ?args, "Running git");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound && dir.is_dir() => {
                Err(VcsError::NotFound(self.binary.clone()))
            }
            Ok(Err(e)) => Err(VcsError::Io(e)),
            Err(_) => Err(VcsError::Timeout {
                op,
                after: self.timeout,
            }),
        }
    }

    /// Run git and fail on a non-zero exit status
    async fn run_checked(
        &self,
        op: &'static str,
        dir: &Path,
        args: &[&str],
    ) -> Result<Output, VcsError> {
        let output = self.run(op, dir, args).await?;
        if !output.status.success() {
            return Err(failure(op, &output));
        }
        Ok(output)
    }
}

fn failure(op: &'static str, output: &Output) -> VcsError {
    VcsError::Failed {
        op,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Run a libgit2 closure against the repository in `dir` off the async runtime
async fn with_repo<T, F>(op: &'static str, dir: &Path, f: F) -> Result<T, VcsError>
where
    T: Send + 'static,
    F: FnOnce(&Repository) -> Result<T, git2::Error> + Send + 'static,
{
    let dir: PathBuf = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir).map_err(|source| VcsError::Git { op, source })?;
        f(&repo).map_err(|source| VcsError::Git { op, source })
    })
    .await
    .map_err(|e| VcsError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl Vcs for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<CloneOutcome, VcsError> {
        let output = self
            .run("clone", dir, &["clone", "--quiet", url, "."])
            .await?;

        if output.status.success() {
            return Ok(CloneOutcome::Fresh);
        }

        if String::from_utf8_lossy(&output.stderr).contains(DESTINATION_NOT_EMPTY) {
            return Ok(CloneOutcome::Existing);
        }

        Err(failure("clone", &output))
    }

    async fn pull(&self, dir: &Path, git_ref: &str) -> Result<(), VcsError> {
        // fetch + hard reset rather than `git pull`: the pinned branch must
        // follow the upstream ref even across force-pushes
        self.run_checked(
            "fetch",
            dir,
            &["-c", "gc.auto=0", "fetch", "--quiet", "origin", git_ref],
        )
        .await?;
        self.run_checked("reset", dir, &["reset", "--hard", "--quiet", "FETCH_HEAD"])
            .await?;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), VcsError> {
        // without "--" a ref that names a tracked file restores that file instead
        self.run_checked("checkout", dir, &["checkout", "-qf", git_ref, "--"])
            .await?;
        Ok(())
    }

    async fn resolve_hash(&self, dir: &Path, rev: &str) -> Result<String, VcsError> {
        let rev = rev.to_string();
        with_repo("rev-parse", dir, move |repo| {
            let commit = repo.revparse_single(&rev)?.peel_to_commit()?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn pin_default_branch(&self, dir: &Path, hash: &str) -> Result<(), VcsError> {
        let hash = hash.to_string();
        with_repo("update-ref", dir, move |repo| {
            let oid = Oid::from_str(&hash)?;
            let branch = format!("refs/heads/{}", PINNED_BRANCH);
            repo.reference(&branch, oid, true, "reporef: pin default branch")?;
            repo.set_head(&branch)
        })
        .await
    }

    async fn refresh_serving_metadata(&self, dir: &Path) -> Result<(), VcsError> {
        self.run_checked("update-server-info", dir, &["update-server-info"])
            .await?;
        Ok(())
    }
}
