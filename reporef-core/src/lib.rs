//! Reporef Core - repository reference resolution and synchronization
//!
//! This crate turns request paths like `github.com/alice/bar@feature-x` into
//! canonical repository references, keeps one live record per reference, and
//! keeps a local clone of each reference pinned to the requested ref so it can
//! be served to dumb-protocol git clients.

pub mod config;
pub mod error;
pub mod identity;
pub mod provider;
pub mod registry;
pub mod reporef;
pub mod sync;
pub mod vcs;

pub use config::{CacheConfig, Config, GitConfig, ProviderConfig, ServerConfig};
pub use error::{Error, Result};
pub use identity::{resolve, Identity, RefKind, RefSpec, Resolved};
pub use provider::{Provider, ProviderRegistry};
pub use registry::Registry;
pub use reporef::{RepoRef, RepoRefSummary};
pub use sync::{SyncEngine, SyncOutcome};
pub use vcs::{CloneOutcome, GitCli, Vcs, VcsError};
