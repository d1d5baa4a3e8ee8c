//! Hosting provider table
//!
//! Maps the first segment of a request path to a known git hosting provider.
//! Only providers in this table can be referenced; everything else is rejected
//! before any cache interaction happens.

use std::collections::HashMap;

use crate::config::ProviderConfig;

/// A git hosting provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    /// Host segment (e.g., "github.com")
    pub host: String,
    /// Display name (e.g., "GitHub")
    pub name: String,
    /// Ref used when a request does not name one
    pub default_branch: String,
    /// Clone URL template with `{host}`, `{owner}` and `{repo}` placeholders
    pub clone_url_template: String,
}

impl Provider {
    /// The GitHub provider
    pub fn github() -> Self {
        Self {
            host: "github.com".to_string(),
            name: "GitHub".to_string(),
            default_branch: "master".to_string(),
            clone_url_template: "https://{host}/{owner}/{repo}.git".to_string(),
        }
    }

    /// Build the upstream clone URL for a repository of this provider
    pub fn clone_url(&self, owner: &str, repo: &str) -> String {
        self.clone_url_template
            .replace("{host}", &self.host)
            .replace("{owner}", owner)
            .replace("{repo}", repo)
    }
}

impl From<&ProviderConfig> for Provider {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            host: config.host.clone(),
            name: config.name.clone(),
            default_branch: config.default_branch.clone(),
            clone_url_template: config.clone_url.clone(),
        }
    }
}

/// Lookup table from host segment to provider
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
}

impl ProviderRegistry {
    /// Create a registry holding only the built-in providers
    pub fn new() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(Provider::github());
        registry
    }

    /// Create a registry from the built-in providers plus configured ones
    ///
    /// A configured provider replaces a built-in one with the same host.
    pub fn from_config(extra: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for config in extra {
            registry.register(Provider::from(config));
        }
        registry
    }

    /// Add or replace a provider
    pub fn register(&mut self, provider: Provider) {
        self.providers.insert(provider.host.clone(), provider);
    }

    /// Look up the provider for a host segment
    pub fn lookup(&self, host: &str) -> Option<&Provider> {
        self.providers.get(host)
    }

    /// All known providers, sorted by host
    pub fn all(&self) -> Vec<&Provider> {
        let mut providers: Vec<_> = self.providers.values().collect();
        providers.sort_by(|a, b| a.host.cmp(&b.host));
        providers
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
