//! Error types for reporef

use thiserror::Error;

use crate::vcs::VcsError;

/// Result type alias for reporef operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for reporef operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The host segment does not name a known provider
    #[error("Unknown or unsupported git provider: {0}")]
    UnsupportedProvider(String),

    /// The request path cannot be turned into a repository reference
    #[error("Malformed repository reference: {0}")]
    MalformedIdentity(String),

    /// A clone, pull, checkout or metadata step failed
    #[error("Synchronization failed: {0}")]
    Sync(#[from] VcsError),

    /// The first synchronization of a reference failed in another request
    #[error("Could not set up reporef {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error was produced while parsing the request path
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::UnsupportedProvider(_) | Error::MalformedIdentity(_))
    }
}
