//! Live repository reference records
//!
//! A [`RepoRef`] is created once per identity by the registry and shared as
//! `Arc<RepoRef>` between every request for that identity. It carries two
//! locks with different jobs:
//!
//! - `sync` serializes synchronization attempts and staleness decisions, and
//!   owns the bookkeeping in [`SyncState`].
//! - `files` separates readers of the working copy (file serving, shared)
//!   from the synchronization engine rewriting it (exclusive).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};

use crate::identity::{Identity, RefKind, RefSpec};

/// Synchronization bookkeeping, guarded by the record's sync lock
#[derive(Debug, Default)]
pub struct SyncState {
    /// Time of the last successful synchronization
    pub last_sync: Option<SystemTime>,
    /// Commit the default branch was pinned to by the last success
    pub pinned: Option<String>,
    /// Consecutive failed refreshes since the last success
    pub failures: u32,
    /// No refresh is attempted before this time
    pub retry_after: Option<SystemTime>,
    /// The first synchronization succeeded
    pub initialized: bool,
    /// The record was dropped from the registry; its directory is going away
    pub evicted: bool,
}

impl SyncState {
    /// Record a successful synchronization
    pub fn record_success(&mut self, now: SystemTime, pinned: String) {
        self.last_sync = Some(now);
        self.pinned = Some(pinned);
        self.failures = 0;
        self.retry_after = None;
        self.initialized = true;
    }

    /// Record a failed refresh and when the next attempt may happen
    pub fn record_failure(&mut self, retry_after: SystemTime) {
        self.failures = self.failures.saturating_add(1);
        self.retry_after = Some(retry_after);
    }
}

/// A repository pinned at a ref, with its local working copy
#[derive(Debug)]
pub struct RepoRef {
    spec: RefSpec,
    dir: PathBuf,
    pub(crate) sync: Arc<Mutex<SyncState>>,
    files: RwLock<()>,
    ready: AtomicBool,
    last_access: parking_lot::Mutex<SystemTime>,
}

impl RepoRef {
    /// Create a record whose working copy lives in `dir`
    pub fn new(spec: RefSpec, dir: PathBuf) -> Self {
        Self {
            spec,
            dir,
            sync: Arc::new(Mutex::new(SyncState::default())),
            files: RwLock::new(()),
            ready: AtomicBool::new(false),
            last_access: parking_lot::Mutex::new(SystemTime::now()),
        }
    }

    /// The parsed reference
    pub fn spec(&self) -> &RefSpec {
        &self.spec
    }

    /// Registry key
    pub fn identity(&self) -> &Identity {
        self.spec.identity()
    }

    /// Requested branch, tag or commit
    pub fn git_ref(&self) -> &str {
        self.spec.git_ref()
    }

    /// Commit or branch
    pub fn kind(&self) -> RefKind {
        self.spec.kind()
    }

    /// Working copy directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The repository's `.git` directory, root of dumb-protocol serving
    pub fn git_dir(&self) -> PathBuf {
        self.dir.join(".git")
    }

    /// Take a shared lock on the working copy for reading files
    ///
    /// Synchronization waits until every reader has dropped its guard.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.files.read().await
    }

    pub(crate) async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.files.write().await
    }

    /// Whether the first synchronization succeeded and the files can be served
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Mark the record as used now
    pub fn touch(&self) {
        *self.last_access.lock() = SystemTime::now();
    }

    /// When the record was last used
    pub fn last_access(&self) -> SystemTime {
        *self.last_access.lock()
    }

    /// Time of the last successful synchronization
    pub async fn last_sync(&self) -> Option<SystemTime> {
        self.sync.lock().await.last_sync
    }

    /// Summarize the record without waiting for an in-flight synchronization
    pub fn summary(&self) -> RepoRefSummary {
        let (last_sync, pinned, failures, syncing) = match self.sync.try_lock() {
            Ok(state) => (state.last_sync, state.pinned.clone(), state.failures, false),
            Err(_) => (None, None, 0, true),
        };

        RepoRefSummary {
            identity: self.identity().clone(),
            kind: self.kind(),
            git_ref: self.git_ref().to_string(),
            last_sync,
            pinned,
            failures,
            syncing,
        }
    }
}

/// Point-in-time view of a record, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RepoRefSummary {
    /// Registry key
    pub identity: Identity,
    /// Commit or branch
    pub kind: RefKind,
    /// Requested ref
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Last successful synchronization
    #[serde(with = "humantime_serde")]
    pub last_sync: Option<SystemTime>,
    /// Pinned commit
    pub pinned: Option<String>,
    /// Consecutive failed refreshes
    pub failures: u32,
    /// A synchronization was running when the summary was taken
    pub syncing: bool,
}
