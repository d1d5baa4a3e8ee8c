//! In-memory `Vcs` for tests
//!
//! Lays out a minimal `.git` directory on disk so that the serving side has
//! files to read, and counts every operation so tests can assert how many
//! clones or pulls actually happened.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CloneOutcome, Vcs, VcsError, PINNED_BRANCH};
use crate::identity::RefKind;

/// Counting, scriptable fake of a version-control tool
#[derive(Debug, Default)]
pub struct FakeVcs {
    /// Number of clone attempts
    pub clones: AtomicUsize,
    /// Number of pulls
    pub pulls: AtomicUsize,
    /// Number of checkouts
    pub checkouts: AtomicUsize,
    /// Number of pins
    pub pins: AtomicUsize,
    fail_clone: AtomicBool,
    fail_pull: AtomicBool,
    fail_checkout: AtomicBool,
    delay: Mutex<Duration>,
    tips: Mutex<HashMap<String, String>>,
}

impl FakeVcs {
    /// Create a fake where every operation succeeds immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every clone take `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    /// Set the commit a branch name resolves to
    pub fn set_tip(&self, branch: &str, hash: &str) {
        self.tips.lock().insert(branch.to_string(), hash.to_string());
    }

    /// Toggle clone failures
    pub fn fail_clone(&self, fail: bool) {
        self.fail_clone.store(fail, Ordering::SeqCst);
    }

    /// Toggle pull failures
    pub fn fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    /// Toggle checkout failures
    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    /// Number of clone attempts so far
    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    /// Number of pulls so far
    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn tip_of(&self, rev: &str) -> String {
        if RefKind::classify(rev) == RefKind::Commit {
            return rev.to_string();
        }
        self.tips
            .lock()
            .get(rev)
            .cloned()
            .unwrap_or_else(|| "0123456789abcdef0123456789abcdef01234567".to_string())
    }
}

fn failed(op: &'static str) -> VcsError {
    VcsError::Failed {
        op,
        code: Some(128),
        stderr: format!("fatal: simulated {} failure", op),
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn clone_repo(&self, _url: &str, dir: &Path) -> Result<CloneOutcome, VcsError> {
        self.clones.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if dir.join(".git").exists() {
            return Ok(CloneOutcome::Existing);
        }

        if self.fail_clone.load(Ordering::SeqCst) {
            return Err(failed("clone"));
        }

        tokio::fs::create_dir_all(dir.join(".git/refs/heads")).await?;
        tokio::fs::create_dir_all(dir.join(".git/objects/pack")).await?;
        tokio::fs::create_dir_all(dir.join(".git/info")).await?;
        Ok(CloneOutcome::Fresh)
    }

    async fn pull(&self, _dir: &Path, _git_ref: &str) -> Result<(), VcsError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(failed("fetch"));
        }
        Ok(())
    }

    async fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), VcsError> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(failed("checkout"));
        }
        tokio::fs::write(dir.join(".git/CHECKED_OUT"), git_ref).await?;
        Ok(())
    }

    async fn resolve_hash(&self, dir: &Path, rev: &str) -> Result<String, VcsError> {
        let rev = if rev == "HEAD" {
            tokio::fs::read_to_string(dir.join(".git/CHECKED_OUT"))
                .await
                .unwrap_or_else(|_| PINNED_BRANCH.to_string())
        } else {
            rev.to_string()
        };
        Ok(self.tip_of(&rev))
    }

    async fn pin_default_branch(&self, dir: &Path, hash: &str) -> Result<(), VcsError> {
        self.pins.fetch_add(1, Ordering::SeqCst);
        let git_dir = dir.join(".git");
        tokio::fs::write(
            git_dir.join("HEAD"),
            format!("ref: refs/heads/{}\n", PINNED_BRANCH),
        )
        .await?;
        tokio::fs::write(
            git_dir.join("refs/heads").join(PINNED_BRANCH),
            format!("{}\n", hash),
        )
        .await?;
        Ok(())
    }

    async fn refresh_serving_metadata(&self, dir: &Path) -> Result<(), VcsError> {
        let git_dir = dir.join(".git");
        let tip = tokio::fs::read_to_string(git_dir.join("refs/heads").join(PINNED_BRANCH)).await?;
        tokio::fs::write(
            git_dir.join("info/refs"),
            format!("{}\trefs/heads/{}\n", tip.trim(), PINNED_BRANCH),
        )
        .await?;
        Ok(())
    }
}
