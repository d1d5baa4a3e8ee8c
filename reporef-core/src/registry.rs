//! Process-wide registry of live repository references
//!
//! # Locking
//!
//! The registry lock only covers the lookup-or-insert step and is never held
//! across an `.await`. A newly inserted record has its own sync lock taken
//! before the registry lock is released, so a concurrent request for the same
//! identity finds the record and then waits on that sync lock instead of
//! starting a second clone. Slow first synchronizations therefore block only
//! requests for their own identity.
//!
//! # Failure
//!
//! If the first synchronization fails, the working directory and the map
//! entry are removed while the sync lock is still held. Waiters observe the
//! failure; the next request starts over with a new record.
//!
//! # Capacity
//!
//! With `max_entries` set, inserting beyond the bound evicts the least
//! recently accessed idle record. Its directory is moved aside under the
//! registry lock and deleted afterwards, so a re-created record for the same
//! identity never shares files with the evicted one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::identity::{Identity, RefSpec};
use crate::reporef::{RepoRef, RepoRefSummary, SyncState};
use crate::sync::{remove_dir, SyncEngine};
use crate::{Error, Result};

struct Inner {
    entries: Mutex<HashMap<Identity, Arc<RepoRef>>>,
    engine: SyncEngine,
    data_dir: PathBuf,
    max_entries: usize,
}

impl Inner {
    /// Drop `record` from the map unless another record took its place
    fn remove_if_same(&self, record: &Arc<RepoRef>) {
        let mut entries = self.entries.lock();
        if entries
            .get(record.identity())
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            entries.remove(record.identity());
        }
    }

    /// Pick the least recently accessed idle record other than `keep`
    fn pick_victim(
        &self,
        entries: &HashMap<Identity, Arc<RepoRef>>,
        keep: &Identity,
    ) -> Option<Arc<RepoRef>> {
        if self.max_entries == 0 || entries.len() <= self.max_entries {
            return None;
        }

        entries
            .values()
            .filter(|record| record.identity() != keep)
            .filter(|record| {
                record
                    .sync
                    .try_lock()
                    .map(|state| state.initialized)
                    .unwrap_or(false)
            })
            .min_by_key(|record| record.last_access())
            .cloned()
    }
}

/// Concurrency-safe map from identity to live record
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("data_dir", &self.inner.data_dir)
            .field("max_entries", &self.inner.max_entries)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry keeping working copies below `config.data_dir`
    pub fn new(engine: SyncEngine, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                engine,
                data_dir: config.data_dir.clone(),
                max_entries: config.max_entries,
            }),
        }
    }

    /// The synchronization engine
    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    /// Root directory of all working copies
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Working directory used for `spec`
    pub fn local_dir_for(&self, spec: &RefSpec) -> PathBuf {
        spec.local_dir(&self.inner.data_dir)
    }

    /// Look up a record whose first synchronization succeeded
    ///
    /// Records still being set up, or whose setup failed, are not returned.
    pub fn get(&self, identity: &Identity) -> Option<Arc<RepoRef>> {
        self.inner
            .entries
            .lock()
            .get(identity)
            .filter(|record| record.is_ready())
            .cloned()
    }

    /// Number of registered records
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no record is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries of all registered records, sorted by identity
    pub fn snapshot(&self) -> Vec<RepoRefSummary> {
        let records: Vec<_> = self.inner.entries.lock().values().cloned().collect();
        let mut summaries: Vec<_> = records.iter().map(|record| record.summary()).collect();
        summaries.sort_by(|a, b| a.identity.cmp(&b.identity));
        summaries
    }

    /// Return the record for `spec`, creating and synchronizing it if needed
    ///
    /// Returns only records whose first synchronization succeeded.
    pub async fn get_or_create(&self, spec: RefSpec) -> Result<Arc<RepoRef>> {
        loop {
            let (record, creator, victim) = self.lookup_or_insert(&spec)?;

            if let Some(victim) = victim {
                tokio::spawn(purge(self.inner.clone(), victim));
            }

            let ready = match creator {
                Some(guard) => self.initialize(record, guard).await?,
                None => self.wait_initialized(record).await?,
            };

            if let Some(record) = ready {
                record.touch();
                return Ok(record);
            }
            // the record was evicted while we waited for it
        }
    }

    /// Refresh `record` if it is stale; returns whether a sync ran
    pub async fn refresh_if_stale(&self, record: &Arc<RepoRef>) -> Result<bool> {
        record.touch();
        let engine = self.inner.engine.clone();
        let record = record.clone();

        // a dropped request must not abandon a running refresh
        tokio::spawn(async move { engine.refresh_if_stale(&record).await })
            .await
            .map_err(|e| Error::Other(format!("Refresh task failed: {}", e)))?
    }

    #[allow(clippy::type_complexity)]
    fn lookup_or_insert(
        &self,
        spec: &RefSpec,
    ) -> Result<(
        Arc<RepoRef>,
        Option<OwnedMutexGuard<SyncState>>,
        Option<Arc<RepoRef>>,
    )> {
        let mut entries = self.inner.entries.lock();

        if let Some(existing) = entries.get(spec.identity()) {
            return Ok((existing.clone(), None, None));
        }

        let record = Arc::new(RepoRef::new(spec.clone(), self.local_dir_for(spec)));
        let guard = record
            .sync
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Other(format!("New reporef {} is already locked", spec.identity())))?;
        entries.insert(spec.identity().clone(), record.clone());

        let victim = self.inner.pick_victim(&entries, spec.identity());
        if let Some(ref victim) = victim {
            entries.remove(victim.identity());
        }

        debug!(identity = %spec.identity(), "Registered new reporef");
        Ok((record, Some(guard), victim))
    }

    async fn initialize(
        &self,
        record: Arc<RepoRef>,
        mut guard: OwnedMutexGuard<SyncState>,
    ) -> Result<Option<Arc<RepoRef>>> {
        let inner = self.inner.clone();
        let task_record = record.clone();

        let task = tokio::spawn(async move {
            let result = inner.engine.sync_locked(&task_record, &mut guard).await;
            if result.is_ok() {
                task_record.mark_ready();
            } else {
                if inner.engine.cleanup_failed_clones() {
                    remove_dir(task_record.dir()).await;
                }
                inner.remove_if_same(&task_record);
            }
            // guard released only after cleanup, so waiters see the final state
            drop(guard);
            result
        });

        match task.await {
            Ok(Ok(outcome)) => {
                info!(identity = %record.identity(), ?outcome, "Reporef set up");
                Ok(Some(record))
            }
            Ok(Err(e)) => Err(e),
            Err(e) => {
                self.inner.remove_if_same(&record);
                Err(Error::Other(format!("Synchronization task failed: {}", e)))
            }
        }
    }

    async fn wait_initialized(&self, record: Arc<RepoRef>) -> Result<Option<Arc<RepoRef>>> {
        let state = record.sync.lock().await;
        if state.evicted {
            return Ok(None);
        }
        if !state.initialized {
            return Err(Error::InitFailed(record.identity().to_string()));
        }
        drop(state);
        Ok(Some(record))
    }
}

/// Delete an evicted record's working copy once nobody is using it
async fn purge(inner: Arc<Inner>, victim: Arc<RepoRef>) {
    let mut state = victim.sync.lock().await;
    state.evicted = true;
    let _files = victim.write().await;

    let trash = {
        let entries = inner.entries.lock();
        if entries.contains_key(victim.identity()) {
            debug!(identity = %victim.identity(), "Evicted reporef was re-created, keeping files");
            return;
        }

        // a same-filesystem rename; holding the lock across it keeps a
        // re-created record from seeing the old directory
        let trash = trash_path(victim.dir());
        if let Err(e) = std::fs::rename(victim.dir(), &trash) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to move evicted {:?} aside: {}", victim.dir(), e);
            }
            return;
        }
        trash
    };

    remove_dir(&trash).await;
    info!(identity = %victim.identity(), "Evicted reporef");
}

fn trash_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    dir.with_file_name(format!(".{}.evicted-{}", name, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::resolve;
    use crate::provider::{Provider, ProviderRegistry};
    use crate::vcs::fake::FakeVcs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(temp: &TempDir, vcs: &Arc<FakeVcs>, max_entries: usize) -> Registry {
        let config = CacheConfig {
            data_dir: temp.path().to_path_buf(),
            max_entries,
            ..CacheConfig::default()
        };
        Registry::new(SyncEngine::with_config(vcs.clone(), &config), &config)
    }

    fn spec(repo: &str, git_ref: &str) -> RefSpec {
        RefSpec::new(Provider::github(), "alice", repo, git_ref)
    }

    #[tokio::test]
    async fn test_concurrent_first_access_clones_once() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().with_delay(Duration::from_millis(100)));
        let registry = registry(&temp, &vcs, 0);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create(spec("bar", "master")).await })
            })
            .collect();

        let mut records = Vec::new();
        for task in tasks {
            records.push(task.await.unwrap().unwrap());
        }

        assert_eq!(vcs.clone_count(), 1);
        assert_eq!(registry.len(), 1);
        assert!(records.iter().all(|r| Arc::ptr_eq(r, &records[0])));
    }

    #[tokio::test]
    async fn test_distinct_identities_are_independent() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);

        let a = registry.get_or_create(spec("bar", "master")).await.unwrap();
        let b = registry.get_or_create(spec("bar", "dev")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.dir(), b.dir());
        assert_eq!(vcs.clone_count(), 2);

        let again = registry.get_or_create(spec("bar", "master")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(vcs.clone_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_provider_leaves_registry_unchanged() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);

        let err = resolve(&ProviderRegistry::new(), "/bitbucket.org/a/b").unwrap_err();
        assert!(matches!(err, Error::UnsupportedProvider(_)));
        assert!(registry.is_empty());
        assert_eq!(vcs.clone_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_first_sync_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);
        let dir = registry.local_dir_for(&spec("bar", "master"));

        vcs.fail_clone(true);
        assert!(registry.get_or_create(spec("bar", "master")).await.is_err());
        assert!(registry.is_empty());
        assert!(!dir.exists());

        vcs.fail_clone(false);
        let record = registry.get_or_create(spec("bar", "master")).await.unwrap();
        assert_eq!(record.dir(), dir);
        assert!(dir.join(".git").exists());
        assert_eq!(vcs.clone_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_checkout_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        vcs.fail_checkout(true);
        let registry = registry(&temp, &vcs, 0);

        let err = registry.get_or_create(spec("bar", "gone")).await.unwrap_err();
        assert!(matches!(err, Error::Sync(_)));
        assert!(registry.is_empty());
        assert!(!registry.local_dir_for(&spec("bar", "gone")).exists());
    }

    #[tokio::test]
    async fn test_waiters_see_failed_first_sync() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().with_delay(Duration::from_millis(100)));
        vcs.fail_clone(true);
        let registry = registry(&temp, &vcs, 0);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create(spec("bar", "master")).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }
        assert_eq!(vcs.clone_count(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_through_registry() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);

        let record = registry.get_or_create(spec("bar", "master")).await.unwrap();
        assert!(!registry.refresh_if_stale(&record).await.unwrap());

        {
            let mut state = record.sync.lock().await;
            state.last_sync = Some(SystemTime::now() - Duration::from_secs(3600));
        }
        assert!(registry.refresh_if_stale(&record).await.unwrap());
        assert_eq!(vcs.pull_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_waits_for_readers() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);

        let record = registry.get_or_create(spec("bar", "master")).await.unwrap();
        record.sync.lock().await.last_sync = Some(SystemTime::now() - Duration::from_secs(3600));

        let reader = record.read().await;
        let mut refresh = tokio::spawn({
            let registry = registry.clone();
            let record = record.clone();
            async move { registry.refresh_if_stale(&record).await }
        });

        assert!(tokio::time::timeout(Duration::from_millis(100), &mut refresh)
            .await
            .is_err());
        assert_eq!(vcs.clone_count(), 1);
        assert_eq!(vcs.pull_count(), 0);

        drop(reader);
        assert!(refresh.await.unwrap().unwrap());
        assert_eq!(vcs.pull_count(), 1);
    }

    #[tokio::test]
    async fn test_first_sync_survives_cancelled_caller() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().with_delay(Duration::from_millis(200)));
        let registry = registry(&temp, &vcs, 0);

        let creator = tokio::spawn({
            let registry = registry.clone();
            async move { registry.get_or_create(spec("bar", "master")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        creator.abort();
        assert!(creator.await.unwrap_err().is_cancelled());

        let record = registry.get_or_create(spec("bar", "master")).await.unwrap();
        assert_eq!(vcs.clone_count(), 1);
        assert!(record.is_ready());
        assert!(record.sync.lock().await.initialized);
        assert!(record.dir().join(".git").exists());
    }

    #[tokio::test]
    async fn test_get_skips_records_not_ready() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new().with_delay(Duration::from_millis(100)));
        let registry = registry(&temp, &vcs, 0);
        let identity = spec("bar", "master").identity().clone();

        let creator = tokio::spawn({
            let registry = registry.clone();
            async move { registry.get_or_create(spec("bar", "master")).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&identity).is_none());

        let record = creator.await.unwrap().unwrap();
        let found = registry.get(&identity).unwrap();
        assert!(Arc::ptr_eq(&record, &found));

        vcs.fail_clone(true);
        let failed = spec("bar", "dev");
        assert!(registry.get_or_create(failed.clone()).await.is_err());
        assert!(registry.get(failed.identity()).is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 2);

        let old = registry.get_or_create(spec("old", "master")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let recent = registry.get_or_create(spec("recent", "master")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        recent.touch();

        let newest = registry.get_or_create(spec("newest", "master")).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(old.identity()).is_none());
        assert!(registry.get(recent.identity()).is_some());
        assert!(registry.get(newest.identity()).is_some());

        // the purge runs in the background
        for _ in 0..100 {
            if !old.dir().exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!old.dir().exists());
        assert!(old.sync.lock().await.evicted);
        assert!(recent.dir().exists());
    }

    #[tokio::test]
    async fn test_snapshot() {
        let temp = TempDir::new().unwrap();
        let vcs = Arc::new(FakeVcs::new());
        let registry = registry(&temp, &vcs, 0);

        registry.get_or_create(spec("b", "master")).await.unwrap();
        registry.get_or_create(spec("a", "master")).await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].identity.as_str(), "github.com/alice/a@master");
        assert!(snapshot.iter().all(|s| s.last_sync.is_some() && !s.syncing));
    }

    #[test]
    fn test_trash_path_is_sibling() {
        let trash = trash_path(Path::new("/data/github.com/alice/bar@master"));
        assert_eq!(trash.parent(), Some(Path::new("/data/github.com/alice")));
        assert!(trash
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".bar@master.evicted-"));
    }
}
