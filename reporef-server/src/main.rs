//! reporef - serve git repositories pinned at a branch or commit
//!
//! Requests like `/github.com/alice/bar@dev` are answered from a local clone
//! whose default branch is pinned to the requested ref, so dumb-protocol git
//! clients and `go get` see exactly that state.

mod commands;
mod http;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reporef_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{ResolveArgs, ServeArgs};

/// reporef: pinned git references over HTTP
#[derive(Parser, Debug)]
#[command(name = "reporef")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ~/.config/reporef/config.toml)
    #[arg(short, long, global = true, env = "REPOREF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run the HTTP service
    #[command(visible_alias = "s")]
    Serve(ServeArgs),

    /// Show how a request path is resolved
    Resolve(ResolveArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let (listen, data_dir) = match &cli.command {
        Some(Commands::Serve(args)) => (args.listen.clone(), args.data_dir.clone()),
        _ => (None, None),
    };
    let config = Config::load_with_overrides(cli.config.as_deref(), listen, data_dir)?;

    if cli.verbose {
        tracing::info!(
            listen = %config.server.listen,
            data_dir = %config.cache.data_dir.display(),
            git = %config.git.binary,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("reporef {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Resolve(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Config) => {
            println!("reporef Configuration");
            println!("=====================");
            println!();
            println!("Server:");
            println!("  listen: {}", config.server.listen);
            println!("  base_url: {}", config.server.base_url);
            println!("  public_host: {}", config.server.public_host);
            println!("  home_url: {}", config.server.home_url);
            if !config.server.alias_hosts.is_empty() {
                println!("  alias_hosts: {}", config.server.alias_hosts.join(", "));
            }
            println!();
            println!("Cache:");
            println!("  data_dir: {}", config.cache.data_dir.display());
            println!("  ttl: {:?}", config.cache.ttl);
            println!("  failure_backoff: {:?}", config.cache.failure_backoff);
            println!("  max_failure_backoff: {:?}", config.cache.max_failure_backoff);
            match config.cache.max_entries {
                0 => println!("  max_entries: unlimited"),
                n => println!("  max_entries: {}", n),
            }
            println!("  cleanup_failed_clones: {}", config.cache.cleanup_failed_clones);
            println!();
            println!("Git:");
            println!("  binary: {}", config.git.binary);
            println!("  timeout: {:?}", config.git.timeout);
            if !config.providers.is_empty() {
                println!();
                println!("Extra providers:");
                for provider in &config.providers {
                    println!("  {} ({})", provider.host, provider.name);
                }
            }
            println!();
            let path = cli.config.clone().or_else(Config::default_config_path);
            if let Some(path) = path {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
        }
        None => {
            println!("reporef - pinned git references over HTTP");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
