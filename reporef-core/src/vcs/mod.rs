//! Version-control capability used by the synchronization engine
//!
//! The engine only talks to this trait; how the operations are carried out
//! (spawning `git`, libgit2, an in-memory fake) is up to the implementation.

mod git;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use git::GitCli;

/// Branch every served repository exposes as its default branch
pub const PINNED_BRANCH: &str = "master";

/// Errors from version-control operations
#[derive(Error, Debug)]
pub enum VcsError {
    /// The executable could not be found
    #[error("{0} executable not found. Is git installed?")]
    NotFound(String),

    /// An invocation ran longer than allowed and was killed
    #[error("git {op} timed out after {after:?}")]
    Timeout {
        /// Operation name
        op: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// An invocation exited unsuccessfully
    #[error("git {op} failed: {stderr}")]
    Failed {
        /// Operation name
        op: &'static str,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured diagnostic output
        stderr: String,
    },

    /// Repository access through libgit2 failed
    #[error("git {op} failed: {source}")]
    Git {
        /// Operation name
        op: &'static str,
        /// Underlying libgit2 error
        source: git2::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a clone attempt found at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    /// The destination was empty and now holds a fresh clone
    Fresh,
    /// The destination already holds a working copy; nothing was cloned
    Existing,
}

/// Operations the synchronization engine needs from a version-control tool
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone `url` into `dir`, or report that `dir` already holds a working copy
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<CloneOutcome, VcsError>;

    /// Bring the working copy in `dir` up to date with `git_ref` on the remote
    async fn pull(&self, dir: &Path, git_ref: &str) -> Result<(), VcsError>;

    /// Check out `git_ref` into the working tree (forced, quiet)
    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), VcsError>;

    /// Resolve a revision to a full commit hash
    async fn resolve_hash(&self, dir: &Path, rev: &str) -> Result<String, VcsError>;

    /// Point [`PINNED_BRANCH`] at `hash` and make HEAD refer to it
    async fn pin_default_branch(&self, dir: &Path, hash: &str) -> Result<(), VcsError>;

    /// Regenerate the files dumb HTTP clients need (`info/refs`, `objects/info/packs`)
    async fn refresh_serving_metadata(&self, dir: &Path) -> Result<(), VcsError>;
}
