//! Serve command - run the HTTP service

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use reporef_core::{Config, GitCli, ProviderRegistry, Registry, SyncEngine};
use tokio::net::TcpListener;
use tracing::info;

use crate::http::{router, AppState};

/// Run the reporef HTTP service
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides config and env)
    #[arg(short, long, env = "REPOREF_LISTEN")]
    pub listen: Option<String>,

    /// Directory holding the working copies (overrides config and env)
    #[arg(long, env = "REPOREF_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Execute the serve command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let data_dir = &config.cache.data_dir;
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let vcs = Arc::new(GitCli::from_config(&config.git));
        let engine = SyncEngine::with_config(vcs, &config.cache);
        let registry = Registry::new(engine, &config.cache);
        let providers = ProviderRegistry::from_config(&config.providers);

        let hosts: Vec<_> = providers.all().iter().map(|p| p.host.as_str()).collect();
        info!(
            listen = %config.server.listen,
            data_dir = %data_dir.display(),
            providers = ?hosts,
            "Starting reporef"
        );

        let app = router(AppState::new(registry, providers, config.server.clone()));
        let listener = TcpListener::bind(&config.server.listen)
            .await
            .with_context(|| format!("Failed to listen on {}", config.server.listen))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("Shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
