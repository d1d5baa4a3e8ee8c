//! Resolve command - show how a request path maps to a reference

use clap::Args;
use reporef_core::{resolve, Config, ProviderRegistry, Resolved};
use std::path::Path;

/// Parse a request path and print the reference it names
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Request path, e.g. github.com/alice/bar@dev
    pub path: String,
}

impl ResolveArgs {
    /// Execute the resolve command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let providers = ProviderRegistry::from_config(&config.providers);
        let path = format!("/{}", self.path.trim_start_matches('/'));
        let resolved = resolve(&providers, &path)?;

        for (label, value) in describe(&resolved, &config.cache.data_dir) {
            println!("{:<10} {}", format!("{}:", label), value);
        }
        Ok(())
    }
}

fn describe(resolved: &Resolved, data_dir: &Path) -> Vec<(&'static str, String)> {
    let spec = &resolved.spec;
    let mut lines = vec![
        ("identity", spec.identity().to_string()),
        ("provider", spec.provider().name.clone()),
        ("kind", spec.kind().to_string()),
        ("ref", spec.git_ref().to_string()),
        ("clone url", spec.clone_url()),
        ("local dir", spec.local_dir(data_dir).display().to_string()),
    ];
    if !resolved.remainder.is_empty() {
        lines.push(("suffix", resolved.remainder.clone()));
    }
    lines
}
