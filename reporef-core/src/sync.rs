//! Synchronization engine
//!
//! Keeps a record's working copy matching its pinned ref:
//!
//! 1. make sure the working directory exists
//! 2. try a fresh clone; a populated destination means an existing clone
//! 3. fresh clone: check out the ref; existing clone: pull branches, leave
//!    commits alone (they cannot change)
//! 4. pin the ref's commit as the default branch
//! 5. regenerate dumb-protocol metadata
//! 6. record the sync time
//!
//! Every step runs under the record's sync lock and with the working copy
//! locked exclusively, so readers never observe a half-rewritten tree.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::identity::RefKind;
use crate::reporef::{RepoRef, SyncState};
use crate::vcs::Vcs;
use crate::Result;

/// What a successful synchronization did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A fresh clone was made and checked out
    Cloned,
    /// An existing branch checkout was pulled
    Updated,
    /// An existing commit checkout needed no upstream contact
    NotRequired,
}

/// Drives a [`Vcs`] to keep records in sync with upstream
#[derive(Clone)]
pub struct SyncEngine {
    vcs: Arc<dyn Vcs>,
    ttl: Duration,
    failure_backoff: Duration,
    max_failure_backoff: Duration,
    cleanup_failed_clones: bool,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("ttl", &self.ttl)
            .field("failure_backoff", &self.failure_backoff)
            .field("max_failure_backoff", &self.max_failure_backoff)
            .field("cleanup_failed_clones", &self.cleanup_failed_clones)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine with the default cache policy
    pub fn new(vcs: Arc<dyn Vcs>) -> Self {
        Self::with_config(vcs, &CacheConfig::default())
    }

    /// Create an engine with the policy from `config`
    pub fn with_config(vcs: Arc<dyn Vcs>, config: &CacheConfig) -> Self {
        Self {
            vcs,
            ttl: config.ttl,
            failure_backoff: config.failure_backoff,
            max_failure_backoff: config.max_failure_backoff.max(config.failure_backoff),
            cleanup_failed_clones: config.cleanup_failed_clones,
        }
    }

    /// Staleness window for branch references
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether a failed first checkout leaves its directory behind
    pub fn cleanup_failed_clones(&self) -> bool {
        self.cleanup_failed_clones
    }

    /// Whether a record in `state` should be synchronized again at `now`
    ///
    /// Only initialized branch records older than the TTL qualify, and not
    /// while a failed refresh is backing off.
    pub fn needs_refresh(&self, kind: RefKind, state: &SyncState, now: SystemTime) -> bool {
        if kind == RefKind::Commit || !state.initialized || state.evicted {
            return false;
        }

        if state.retry_after.is_some_and(|retry| now < retry) {
            return false;
        }

        match state.last_sync {
            Some(last) => now
                .duration_since(last)
                .is_ok_and(|age| age > self.ttl),
            None => true,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.failure_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_failure_backoff)
    }

    /// Synchronize `record` if it is stale; returns whether a sync ran
    ///
    /// A failed refresh keeps the previous working copy, schedules a retry
    /// after the backoff delay, and returns the error.
    pub async fn refresh_if_stale(&self, record: &RepoRef) -> Result<bool> {
        let mut state = record.sync.lock().await;
        if !self.needs_refresh(record.kind(), &state, SystemTime::now()) {
            return Ok(false);
        }

        debug!(identity = %record.identity(), "Reporef is stale, refreshing");
        self.sync_locked(record, &mut state).await.map(|_| true)
    }

    /// Synchronize `record` unconditionally
    pub async fn synchronize(&self, record: &RepoRef) -> Result<SyncOutcome> {
        let mut state = record.sync.lock().await;
        self.sync_locked(record, &mut state).await
    }

    /// Synchronize with the sync lock already held, applying failure policy
    pub(crate) async fn sync_locked(
        &self,
        record: &RepoRef,
        state: &mut SyncState,
    ) -> Result<SyncOutcome> {
        match self.run(record, state).await {
            Ok(outcome) => {
                info!(
                    identity = %record.identity(),
                    outcome = ?outcome,
                    pinned = state.pinned.as_deref().unwrap_or_default(),
                    "Reporef synchronized"
                );
                Ok(outcome)
            }
            Err(e) => {
                if state.initialized {
                    let delay = self.backoff(state.failures.saturating_add(1));
                    state.record_failure(SystemTime::now() + delay);
                    warn!(
                        identity = %record.identity(),
                        failures = state.failures,
                        retry_in = ?delay,
                        "Refresh failed, serving previous checkout: {}",
                        e
                    );
                } else {
                    warn!(identity = %record.identity(), "Initial synchronization failed: {}", e);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, record: &RepoRef, state: &mut SyncState) -> Result<SyncOutcome> {
        let _files = record.write().await;
        let dir = record.dir();
        let git_ref = record.git_ref();

        tokio::fs::create_dir_all(dir).await?;

        let url = record.spec().clone_url();
        debug!(identity = %record.identity(), %url, dir = %dir.display(), "Cloning");

        let outcome = match self.vcs.clone_repo(&url, dir).await {
            Ok(crate::vcs::CloneOutcome::Fresh) => {
                if let Err(e) = self.vcs.checkout(dir, git_ref).await {
                    if self.cleanup_failed_clones {
                        remove_dir(dir).await;
                    }
                    return Err(e.into());
                }
                SyncOutcome::Cloned
            }
            Ok(crate::vcs::CloneOutcome::Existing) => match record.kind() {
                RefKind::Commit => SyncOutcome::NotRequired,
                RefKind::Branch => {
                    self.vcs.pull(dir, git_ref).await?;
                    SyncOutcome::Updated
                }
            },
            Err(e) => {
                if !state.initialized {
                    remove_dir(dir).await;
                }
                return Err(e.into());
            }
        };

        let rev = match record.kind() {
            RefKind::Commit => git_ref,
            RefKind::Branch => "HEAD",
        };
        let hash = self.vcs.resolve_hash(dir, rev).await?;
        self.vcs.pin_default_branch(dir, &hash).await?;
        self.vcs.refresh_serving_metadata(dir).await?;

        state.record_success(SystemTime::now(), hash);
        Ok(outcome)
    }
}

/// Remove a working directory, logging instead of failing
pub(crate) async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed working directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", dir, e),
    }
}
