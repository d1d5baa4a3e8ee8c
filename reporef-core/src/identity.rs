//! Request path parsing into repository references
//!
//! A request path has the shape `/<host>/<owner>/<repo>[@<ref>][/<rest>]`.
//! The first three segments name a repository reference; whatever follows is
//! handed back to the caller untouched (it selects file serving or a page).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::provider::{Provider, ProviderRegistry};
use crate::{Error, Result};

/// Length of a full hexadecimal commit hash
const COMMIT_HASH_LEN: usize = 40;

/// How a ref is treated by the synchronization policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    /// A full commit hash; never changes once fetched
    Commit,
    /// A branch (or tag) name; may move upstream
    Branch,
}

impl RefKind {
    /// Classify a ref: exactly 40 lowercase hex characters is a commit
    pub fn classify(git_ref: &str) -> Self {
        let is_hash = git_ref.len() == COMMIT_HASH_LEN
            && git_ref
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));

        if is_hash {
            RefKind::Commit
        } else {
            RefKind::Branch
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Commit => f.write_str("commit"),
            RefKind::Branch => f.write_str("branch"),
        }
    }
}

/// Canonical key of a repository reference: `host/owner/repo@ref`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Borrow the identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed repository reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    provider: Provider,
    owner: String,
    repo: String,
    git_ref: String,
    kind: RefKind,
    identity: Identity,
}

impl RefSpec {
    /// Build a reference, classifying the ref and composing its identity
    pub fn new(
        provider: Provider,
        owner: impl Into<String>,
        repo: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        let owner = owner.into();
        let repo = repo.into();
        let git_ref = git_ref.into();
        let kind = RefKind::classify(&git_ref);
        let identity = Identity(format!("{}/{}/{}@{}", provider.host, owner, repo, git_ref));

        Self {
            provider,
            owner,
            repo,
            git_ref,
            kind,
            identity,
        }
    }

    /// The hosting provider
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Repository owner
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Bare repository name
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Requested branch, tag or commit
    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    /// Commit or branch
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Registry key
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Upstream repository path without the ref (e.g., "github.com/alice/bar")
    pub fn repo_path(&self) -> String {
        format!("{}/{}/{}", self.provider.host, self.owner, self.repo)
    }

    /// Upstream clone URL
    pub fn clone_url(&self) -> String {
        self.provider.clone_url(&self.owner, &self.repo)
    }

    /// Working directory for this reference below `data_dir`
    pub fn local_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join(&self.provider.host)
            .join(&self.owner)
            .join(format!("{}@{}", self.repo, self.git_ref))
    }
}

/// Result of resolving a request path
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The repository reference
    pub spec: RefSpec,
    /// The three leading segments as requested (e.g., "github.com/alice/bar")
    pub prefix: String,
    /// Everything after the leading segments, without a leading slash
    pub remainder: String,
}

/// Resolve a request path (optionally with query string) into a reference
pub fn resolve(providers: &ProviderRegistry, request_path: &str) -> Result<Resolved> {
    let path = request_path.trim_start_matches('/');

    // A '?' at position 0 is kept as part of the path
    let path = match path.find('?') {
        Some(pos) if pos > 0 => &path[..pos],
        _ => path,
    };

    let mut segments = path.splitn(4, '/');
    let host = segments.next().unwrap_or_default();
    let provider = providers
        .lookup(host)
        .ok_or_else(|| Error::UnsupportedProvider(host.to_string()))?;

    let owner = segments
        .next()
        .ok_or_else(|| Error::MalformedIdentity(format!("missing owner in '{}'", path)))?;
    let repo_segment = segments
        .next()
        .ok_or_else(|| Error::MalformedIdentity(format!("missing repository in '{}'", path)))?;
    let remainder = segments.next().unwrap_or_default().to_string();

    let (repo, git_ref) = split_repo_segment(repo_segment, &provider.default_branch);

    validate_component("owner", owner)?;
    validate_component("repository", repo)?;
    validate_ref(git_ref)?;

    Ok(Resolved {
        spec: RefSpec::new(provider.clone(), owner, repo, git_ref),
        prefix: format!("{}/{}/{}", host, owner, repo_segment),
        remainder,
    })
}

/// Split `repo@ref` at the last '@'; no '@' means the default ref
///
/// A trailing '@' yields an empty ref, which `resolve` rejects.
pub fn split_repo_segment<'a>(segment: &'a str, default_ref: &'a str) -> (&'a str, &'a str) {
    match segment.rfind('@') {
        Some(pos) => (&segment[..pos], &segment[pos + 1..]),
        None => (segment, default_ref),
    }
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::MalformedIdentity(format!("empty {}", what)));
    }

    if value == "." || value == ".." || value.starts_with('-') || value.contains('\\') {
        return Err(Error::MalformedIdentity(format!("invalid {} '{}'", what, value)));
    }

    Ok(())
}

fn validate_ref(git_ref: &str) -> Result<()> {
    if git_ref.is_empty() {
        return Err(Error::MalformedIdentity("empty ref after '@'".to_string()));
    }

    // refs are passed to git as arguments
    if git_ref.starts_with('-') || git_ref.contains("..") || git_ref.contains('\\') {
        return Err(Error::MalformedIdentity(format!("invalid ref '{}'", git_ref)));
    }

    Ok(())
}
