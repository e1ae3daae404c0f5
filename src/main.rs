//! # Context Index CLI (`ctx-index`)
//!
//! ## Usage
//!
//! ```bash
//! ctx-index --config ./ctx-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctx-index sync` | Run the indexer once and print a summary |
//! | `ctx-index serve` | Run the indexer on `[schedule].interval_secs` and serve `/query` |
//! | `ctx-index backends` | List registered index backends |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use context_index::config::{self, Config};
use context_index::embedding::create_embedder;
use context_index::extract::create_extractor;
use context_index::index::{IndexProvider, ProviderRegistry};
use context_index::server;
use context_index::sync::{SyncReport, Synchronizer};

/// Incremental filesystem indexer with a content-addressed cache.
#[derive(Parser)]
#[command(
    name = "ctx-index",
    about = "Incrementally index a directory tree into a searchable document store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ctx-index.toml")]
    config: PathBuf,

    /// Override `[scan].root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full sync: upsert changed files, then delete stale documents.
    Sync,

    /// Sync periodically and serve the query API until Ctrl-C.
    Serve,

    /// List the index backends compiled into this binary.
    Backends,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let registry = ProviderRegistry::with_builtins();

    if let Commands::Backends = cli.command {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(root) = cli.root {
        cfg = cfg.with_root(root);
    }

    let (synchronizer, index) = build(&cfg, &registry)?;

    match cli.command {
        Commands::Sync => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let report = synchronizer.run(&cancel).await?;
            print_report(&report);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let cancel = CancellationToken::new();
            let server_cfg = cfg.server.clone();
            let server_cancel = cancel.clone();
            let server = tokio::spawn(async move {
                server::run_server(&server_cfg, index, server_cancel).await
            });
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutting down");
                    ctrl_c.cancel();
                }
            });

            // The in-flight run observes the token and finishes its pending
            // cache writes before returning.
            let interval = Duration::from_secs(cfg.schedule.interval_secs);
            synchronizer.run_every(interval, &cancel).await;
            cancel.cancel();
            server.await??;
        }
        Commands::Backends => {}
    }

    Ok(())
}

/// Wire collaborators from config. The index backend name is validated here,
/// once, before any run starts.
fn build(
    cfg: &Config,
    registry: &ProviderRegistry,
) -> Result<(Synchronizer, Arc<dyn IndexProvider>)> {
    let embedder = create_embedder(&cfg.embedding)?;
    let extractor = create_extractor(&cfg.extraction)?;
    let index = registry.create(&cfg.index, embedder.clone())?;
    let synchronizer = Synchronizer::new(cfg, extractor, embedder, index.clone())?;
    Ok((synchronizer, index))
}

fn print_report(report: &SyncReport) {
    println!("sync complete");
    println!("  files scanned: {}", report.files_scanned);
    println!("  files indexed: {}", report.files_indexed);
    println!("  extracted: {}", report.extracted);
    println!("  embedded: {}", report.embedded);
    println!("  upserted: {}", report.upserted);
    println!("  deleted: {}", report.deleted);
    println!("  repaired: {}", report.repaired);
    if !report.errors.is_empty() {
        println!("  {}", report.errors);
    }
}
