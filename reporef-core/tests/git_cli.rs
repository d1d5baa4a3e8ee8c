//! End-to-end synchronization against a real git upstream on disk
//!
//! These tests need a git executable and are skipped when none is found.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use reporef_core::{
    CacheConfig, GitCli, Provider, RefSpec, Registry, SyncEngine, SyncOutcome,
};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=master"])
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit(dir: &Path, file: &str, contents: &str) -> String {
    std::fs::write(dir.join(file), contents).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", &format!("update {}", file)]);
    git(dir, &["rev-parse", "HEAD"])
}

/// An upstream at `<root>/alice/bar` with a `dev` branch
fn upstream(root: &Path) -> (Provider, std::path::PathBuf) {
    let repo = root.join("alice").join("bar");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    commit(&repo, "README", "hello\n");
    git(&repo, &["checkout", "-q", "-b", "dev"]);

    let provider = Provider {
        host: "local.test".to_string(),
        name: "Local".to_string(),
        default_branch: "master".to_string(),
        clone_url_template: format!("file://{}/{{owner}}/{{repo}}", root.display()),
    };
    (provider, repo)
}

fn registry(data_dir: &Path) -> Registry {
    let config = CacheConfig {
        data_dir: data_dir.to_path_buf(),
        ttl: Duration::ZERO,
        ..CacheConfig::default()
    };
    let vcs = Arc::new(GitCli::new("git", Duration::from_secs(60)));
    Registry::new(SyncEngine::with_config(vcs, &config), &config)
}

fn pinned_master(dir: &Path) -> (String, String) {
    let repo = git2::Repository::open(dir).unwrap();
    let head = repo.find_reference("HEAD").unwrap();
    let target = head.symbolic_target().unwrap_or_default().to_string();
    let master = repo
        .find_reference("refs/heads/master")
        .unwrap()
        .target()
        .unwrap()
        .to_string();
    (target, master)
}

#[tokio::test]
async fn test_branch_is_pinned_and_follows_upstream() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }

    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (provider, upstream_dir) = upstream(root.path());
    let tip = commit(&upstream_dir, "feature", "one\n");

    let registry = registry(data.path());
    let record = registry
        .get_or_create(RefSpec::new(provider.clone(), "alice", "bar", "dev"))
        .await
        .unwrap();

    let (head, master) = pinned_master(record.dir());
    assert_eq!(head, "refs/heads/master");
    assert_eq!(master, tip);
    assert!(record.git_dir().join("info/refs").exists());

    let next = commit(&upstream_dir, "feature", "two\n");
    assert!(registry.refresh_if_stale(&record).await.unwrap());

    let (head, master) = pinned_master(record.dir());
    assert_eq!(head, "refs/heads/master");
    assert_eq!(master, next);

    let info_refs = std::fs::read_to_string(record.git_dir().join("info/refs")).unwrap();
    assert!(info_refs.contains(&next));
}

#[tokio::test]
async fn test_commit_is_pinned_without_refresh() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }

    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (provider, upstream_dir) = upstream(root.path());
    let first = commit(&upstream_dir, "feature", "one\n");
    commit(&upstream_dir, "feature", "two\n");

    let registry = registry(data.path());
    let spec = RefSpec::new(provider, "alice", "bar", first.as_str());
    let record = registry.get_or_create(spec).await.unwrap();

    let (head, master) = pinned_master(record.dir());
    assert_eq!(head, "refs/heads/master");
    assert_eq!(master, first);

    // commits never go stale, even with a zero TTL
    assert!(!registry.refresh_if_stale(&record).await.unwrap());

    // an existing checkout is reused as is
    let outcome = registry.engine().synchronize(&record).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NotRequired);
    assert_eq!(pinned_master(record.dir()).1, first);
}

#[tokio::test]
async fn test_missing_branch_fails_and_cleans_up() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }

    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (provider, _upstream_dir) = upstream(root.path());

    let registry = registry(data.path());
    let spec = RefSpec::new(provider, "alice", "bar", "no-such-branch");
    let dir = registry.local_dir_for(&spec);

    assert!(registry.get_or_create(spec).await.is_err());
    assert!(registry.is_empty());
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_ref_naming_a_tracked_file_is_rejected() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }

    let root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (provider, _upstream_dir) = upstream(root.path());

    // README is a file in the upstream tree, not a branch
    let registry = registry(data.path());
    let spec = RefSpec::new(provider, "alice", "bar", "README");
    let dir = registry.local_dir_for(&spec);

    assert!(registry.get_or_create(spec).await.is_err());
    assert!(registry.is_empty());
    assert!(!dir.exists());
}
