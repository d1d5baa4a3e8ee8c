//! Configuration management for reporef
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (REPOREF_*)
//! 3. Config file (~/.config/reporef/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: String,

    /// Public base URL, used in go-import meta tags and redirects
    pub base_url: String,

    /// Host part of the import path advertised to `go get`
    pub public_host: String,

    /// Where requests for `/` are redirected
    pub home_url: String,

    /// Host headers that are redirected to `base_url`
    pub alias_hosts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            base_url: "http://localhost:8080".to_string(),
            public_host: "localhost:8080".to_string(),
            home_url: "https://github.com/GeertJohan/reporef".to_string(),
            alias_hosts: Vec::new(),
        }
    }
}

/// Cache and synchronization policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one working copy per reference
    pub data_dir: PathBuf,

    /// How long a branch checkout is considered fresh
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Delay before retrying a failed refresh (doubles per failure)
    #[serde(with = "humantime_serde")]
    pub failure_backoff: Duration,

    /// Upper bound for the refresh retry delay
    #[serde(with = "humantime_serde")]
    pub max_failure_backoff: Duration,

    /// Maximum number of live references (0 = unlimited)
    pub max_entries: usize,

    /// Remove the working directory when a first checkout fails
    pub cleanup_failed_clones: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ttl: Duration::from_secs(60),
            failure_backoff: Duration::from_secs(30),
            max_failure_backoff: Duration::from_secs(600),
            max_entries: 0,
            cleanup_failed_clones: true,
        }
    }
}

/// Git executable configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Path to the git executable
    pub binary: String,

    /// Upper bound for a single git invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// An additional hosting provider declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Host segment as it appears in request paths (e.g. "gitlab.com")
    pub host: String,

    /// Human readable provider name
    pub name: String,

    /// Ref used when the request does not name one
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Clone URL template; `{host}`, `{owner}` and `{repo}` are substituted
    #[serde(default = "default_clone_url")]
    pub clone_url: String,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_clone_url() -> String {
    "https://{host}/{owner}/{repo}.git".to_string()
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Git configuration
    pub git: GitConfig,

    /// Extra providers on top of the built-in table
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/reporef/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reporef").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - REPOREF_LISTEN: Address to listen on
    /// - REPOREF_DATA_DIR: Working copy directory
    /// - REPOREF_BASE_URL: Public base URL
    /// - REPOREF_GIT: Path to git executable
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(listen) = std::env::var("REPOREF_LISTEN") {
            self.server.listen = listen;
        }

        if let Ok(data_dir) = std::env::var("REPOREF_DATA_DIR") {
            self.cache.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(base_url) = std::env::var("REPOREF_BASE_URL") {
            self.server.base_url = base_url;
        }

        if let Ok(git) = std::env::var("REPOREF_GIT") {
            self.git.binary = git;
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, listen: Option<String>, data_dir: Option<PathBuf>) -> Self {
        if let Some(listen) = listen {
            self.server.listen = listen;
        }

        if let Some(dir) = data_dir {
            self.cache.data_dir = dir;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        listen: Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        let config = config
            .with_env_overrides()
            .with_cli_overrides(listen, data_dir);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.git.timeout.is_zero() {
            return Err(Error::Config("git.timeout must be greater than zero".to_string()));
        }

        if self.cache.max_failure_backoff < self.cache.failure_backoff {
            return Err(Error::Config(
                "cache.max_failure_backoff must not be smaller than cache.failure_backoff"
                    .to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.host.is_empty() || provider.host.contains('/') {
                return Err(Error::Config(format!(
                    "Invalid provider host: '{}'",
                    provider.host
                )));
            }
        }

        Ok(())
    }
}

/// Get the default working copy directory
///
/// Returns `~/.cache/reporef/repos`, or `./reporef-repos` when no cache
/// directory is known for the platform.
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("reporef").join("repos"))
        .unwrap_or_else(|| PathBuf::from("reporef-repos"))
}
