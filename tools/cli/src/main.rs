//! FieldLine CLI - Offline sync state inspection and maintenance.
//!
//! This tool reads and maintains the engine's durable state (queue,
//! signatures, blobs) directly on disk. It never talks to the network;
//! delivery is the running app's job.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use fieldline_signing::{pending_signatures, signature_stats, sweep_expired};
use fieldline_store::{BlobStore, LocalStore};
use fieldline_sync::SyncQueue;

#[derive(Parser)]
#[command(name = "fieldline")]
#[command(about = "FieldLine - Offline sync state inspection")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Engine data directory (defaults to the platform data dir).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store, queue, and signature counts.
    Status,

    /// List queued operations.
    Queue {
        /// Only items whose attempt budget is exhausted.
        #[arg(short, long)]
        failed: bool,
    },

    /// List offline signatures.
    Signatures {
        /// Include synced, failed, and expired signatures.
        #[arg(short, long)]
        all: bool,
    },

    /// Reclassify pending signatures whose validity window passed.
    Sweep,

    /// Give a failed queue item a fresh attempt budget.
    Retry {
        /// Queue item id.
        id: Uuid,
    },

    /// Drop queue items whose attempt budget is exhausted.
    PurgeFailed,

    /// Wipe all durable state: collections, cache, and blobs.
    Reset {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Status => cmd_status(&data_dir).await,

        Commands::Queue { failed } => cmd_queue(&data_dir, failed).await,

        Commands::Signatures { all } => cmd_signatures(&data_dir, all).await,

        Commands::Sweep => cmd_sweep(&data_dir).await,

        Commands::Retry { id } => cmd_retry(&data_dir, id).await,

        Commands::PurgeFailed => cmd_purge_failed(&data_dir).await,

        Commands::Reset { yes } => cmd_reset(&data_dir, yes).await,
    }
}

/// Resolve the engine data directory.
fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("fieldline"))
        .context("No platform data directory; pass --data-dir")
}

/// Open the durable store under the data directory.
async fn open_store(data_dir: &Path) -> Result<LocalStore> {
    LocalStore::new(data_dir)
        .await
        .context("Failed to open the data directory")
}

/// Show store, queue, and signature counts.
async fn cmd_status(data_dir: &Path) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);
    let blobs = BlobStore::new(data_dir)
        .await
        .context("Failed to open the blob directory")?;
    let queue = SyncQueue::new(store.clone());

    let queue_status = queue.status().await?;
    let signatures = signature_stats(&store).await?;
    let store_stats = store.stats().await?;
    let blob_stats = blobs.stats().await?;
    let last_sync = store.last_sync_at().await?;

    println!("FieldLine data: {}", data_dir.display());
    println!(
        "  Queue: {} pending, {} failed, {} total",
        queue_status.pending, queue_status.failed, queue_status.total
    );
    println!("  Signatures: {} total", signatures.total);
    for (status, count) in &signatures.by_status {
        println!("    {:?}: {}", status, count);
    }
    println!(
        "  Blobs: {} file(s), {} bytes",
        blob_stats.count, blob_stats.total_bytes
    );
    println!(
        "  Store: {} bytes across {} collections",
        store_stats.total_bytes,
        store_stats.collections.len()
    );
    match last_sync {
        Some(at) => println!("  Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync: never"),
    }

    Ok(())
}

/// List queued operations.
async fn cmd_queue(data_dir: &Path, failed_only: bool) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);
    let queue = SyncQueue::new(store);

    let mut items = queue.items().await?;
    if failed_only {
        items.retain(|item| item.is_exhausted());
    }

    if items.is_empty() {
        if failed_only {
            println!("No failed items.");
        } else {
            println!("Queue is empty.");
        }
        return Ok(());
    }

    println!("{} item(s):", items.len());
    for item in items {
        let state = if item.is_exhausted() {
            "FAILED "
        } else {
            "PENDING"
        };
        println!(
            "  [{}] {} {} {} ({:?}, attempt {}/{})",
            state,
            item.id,
            item.method,
            item.endpoint,
            item.priority,
            item.attempts,
            item.max_attempts
        );
        if let Some(error) = &item.last_error {
            println!("            last error: {}", error);
        }
    }

    Ok(())
}

/// List offline signatures.
async fn cmd_signatures(data_dir: &Path, all: bool) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);

    let signatures = if all {
        store.signatures().await?
    } else {
        pending_signatures(&store).await?
    };

    if signatures.is_empty() {
        println!("No signatures.");
        return Ok(());
    }

    println!("{} signature(s):", signatures.len());
    for sig in signatures {
        println!(
            "  [{:?}] {} doc={} user={} ({:?}, attempt {}, expires {})",
            sig.status,
            sig.id,
            sig.document_id,
            sig.user_id,
            sig.priority,
            sig.attempts,
            sig.expires_at.format("%Y-%m-%d %H:%M UTC")
        );
    }

    Ok(())
}

/// Reclassify pending signatures whose validity window passed.
async fn cmd_sweep(data_dir: &Path) -> Result<()> {
    let store = open_store(data_dir).await?;
    let changed = sweep_expired(&store).await?;
    println!("{} signature(s) reclassified as expired.", changed);
    Ok(())
}

/// Give a failed queue item a fresh attempt budget.
async fn cmd_retry(data_dir: &Path, id: Uuid) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);
    let queue = SyncQueue::new(store);

    queue
        .retry_item(id)
        .await
        .context("Failed to reset the item")?;

    println!("Item {} requeued with a fresh attempt budget.", id);
    Ok(())
}

/// Drop queue items whose attempt budget is exhausted.
async fn cmd_purge_failed(data_dir: &Path) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);
    let queue = SyncQueue::new(store);

    let removed = queue.purge_failed().await?;
    println!("{} failed item(s) removed.", removed);
    Ok(())
}

/// Wipe all durable state.
async fn cmd_reset(data_dir: &Path, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to wipe {} without --yes", data_dir.display());
    }

    let store = open_store(data_dir).await?;
    let blobs = BlobStore::new(data_dir)
        .await
        .context("Failed to open the blob directory")?;

    store.reset().await?;
    blobs.clear().await?;

    println!("All durable state wiped.");
    Ok(())
}
