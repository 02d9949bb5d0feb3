//! # kb-sync CLI (`kbsync`)
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./config/kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync scan` | List local document keys and fingerprints (no network) |
//! | `kbsync sync` | Push changed documents to the vector store once |
//! | `kbsync watch` | Sync periodically until Ctrl-C |
//! | `kbsync remote list` | List files in the vector store |
//! | `kbsync remote name <id>` | Show the document a remote file stands for |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kb_sync::config::{self, Config};
use kb_sync::error::SyncError;
use kb_sync::models::SyncReport;
use kb_sync::openai::OpenAiStore;
use kb_sync::paths::related_document_name;
use kb_sync::sync::SyncEngine;
use kb_sync::walk::{load_document, markdown_files};

/// kb-sync: keep an assistant's vector store in step with local markdown.
///
/// All commands read a TOML configuration file. The OpenAI API key is read
/// from `OPENAI_API_KEY`.
#[derive(Parser)]
#[command(name = "kbsync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbsync.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List markdown documents with their keys and fingerprints.
    ///
    /// Makes no remote calls. Useful for checking `markdown.roots`.
    Scan,

    /// Run one sync pass over every configured location.
    Sync {
        /// Treat current local content as already uploaded; only later edits are pushed.
        #[arg(long)]
        baseline: bool,
    },

    /// Prime the baseline, then sync every `[sync].interval_secs` until Ctrl-C.
    Watch,

    /// Inspect the remote vector store.
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List every file attached to the vector store.
    List,
    /// Show the related-document name for a remote file id.
    Name { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Scan => run_scan(&cfg)?,
        Commands::Sync { baseline } => {
            let cancel = cancel_on_ctrl_c();
            let engine = connect(&cfg, &cancel).await?;
            if baseline {
                for location in &cfg.markdown.locations {
                    engine.prime_baseline(location);
                }
            }
            match sync_locations(&engine, &cfg, &cancel).await {
                Ok(()) => println!("ok"),
                Err(SyncError::Cancelled) => println!("cancelled"),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Watch => {
            let cancel = cancel_on_ctrl_c();
            let engine = connect(&cfg, &cancel).await?;
            for location in &cfg.markdown.locations {
                engine.prime_baseline(location);
            }
            run_watch(&engine, &cfg, &cancel).await?;
        }
        Commands::Remote { action } => {
            let store = OpenAiStore::new(&cfg.assistant)?;
            let engine = SyncEngine::from_config(Arc::new(store), &cfg);
            match action {
                RemoteAction::List => {
                    let files = engine.list_remote_files(&CancellationToken::new()).await?;
                    for file in &files {
                        println!("{}  {}", file.id, file.display_name);
                    }
                    println!("{} files", files.len());
                }
                RemoteAction::Name { id } => {
                    let name = engine.store().file_name(&id).await?;
                    println!("{}", related_document_name(&name));
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping sync");
            token.cancel();
        }
    });
    cancel
}

/// Build the gateway once and seed the engine with the remote listing.
async fn connect(cfg: &Config, cancel: &CancellationToken) -> Result<SyncEngine> {
    let store = OpenAiStore::new(&cfg.assistant)?;
    let engine = SyncEngine::from_config(Arc::new(store), cfg);
    engine.load_remote_ids(cancel).await?;
    Ok(engine)
}

fn run_scan(cfg: &Config) -> Result<()> {
    let mut total = 0usize;
    for location in &cfg.markdown.locations {
        for entry in markdown_files(location, &cfg.markdown.exclude_globs)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            match load_document(&path, &cfg.markdown.roots) {
                Ok(doc) => {
                    println!("{}  {}", doc.fingerprint, doc.key);
                    total += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Error reading file"),
            }
        }
    }
    println!("{} documents", total);
    Ok(())
}

async fn sync_locations(
    engine: &SyncEngine,
    cfg: &Config,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    for location in &cfg.markdown.locations {
        let report = engine.sync_all(location, cancel).await?;
        print_report(&location.display().to_string(), &report);
    }
    Ok(())
}

async fn run_watch(engine: &SyncEngine, cfg: &Config, cancel: &CancellationToken) -> Result<()> {
    let interval = Duration::from_secs(cfg.sync.interval_secs);
    info!(interval_secs = cfg.sync.interval_secs, "Watching for changes");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match sync_locations(engine, cfg, cancel).await {
            Ok(()) => {}
            Err(SyncError::Cancelled) => break,
            Err(e) => warn!(error = %e, "Sync pass failed"),
        }
    }

    println!("stopped");
    Ok(())
}

fn print_report(location: &str, report: &SyncReport) {
    println!("sync {}", location);
    for key in &report.changed {
        println!("  updated: {}", key);
    }
    println!("  changed: {}", report.changed.len());
    println!("  unchanged: {}", report.unchanged);
    println!("  failed: {}", report.failed);
}
