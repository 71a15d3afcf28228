// Operator CLI for inspecting and controlling a crawl store.
//
// The orchestrator itself runs inside a browser host; this binary works
// against the same embedded store to submit batches, flip control
// signals, and pull exports.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use listing_crawler::{
    apply_signal, build_rows, render, ControlAck, ControlSignal, Delimiter, JobStore,
    SledJobStore,
};

#[derive(Parser)]
#[command(name = "crawl", about = "Batch listing-crawl control and export")]
struct Cli {
    /// Path to the crawl store directory.
    #[arg(long, env = "CRAWL_STORE_PATH", default_value = "./crawl-store")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new batch from a target-list file ("-" for stdin).
    Submit {
        /// File holding one descriptor per line.
        file: PathBuf,
    },
    /// Show the current job and per-position progress.
    Status,
    /// Write the aggregated result table.
    Export {
        /// Tab-separated output instead of comma-separated.
        #[arg(long)]
        tsv: bool,
        /// Output file; prints to stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Pause the running batch.
    Pause,
    /// Resume a paused batch.
    Resume,
    /// Stop the running batch, keeping recorded results.
    Stop,
    /// Delete the stored job and all results.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,listing_crawler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = SledJobStore::open(&cli.store)
        .with_context(|| format!("failed to open store at {}", cli.store.display()))?;

    match cli.command {
        Command::Submit { file } => submit(&store, &file).await,
        Command::Status => status(&store).await,
        Command::Export { tsv, out } => export(&store, tsv, out).await,
        Command::Pause => signal(&store, ControlSignal::PauseBatch).await,
        Command::Resume => signal(&store, ControlSignal::ResumeBatch).await,
        Command::Stop => signal(&store, ControlSignal::StopBatch).await,
        Command::Clear => clear(&store).await,
    }
}

async fn submit(store: &SledJobStore, file: &PathBuf) -> Result<()> {
    let submission = if file.as_os_str() == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read target list from stdin")?;
        input
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };

    match apply_signal(store, ControlSignal::StartBatch { submission }).await? {
        ControlAck::Started {
            batch_id,
            target_count,
        } => {
            println!("started batch {batch_id} with {target_count} targets");
        }
        ControlAck::AlreadyRunning { batch_id } => {
            anyhow::bail!("batch {batch_id} is already running; stop or clear it first");
        }
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

async fn status(store: &SledJobStore) -> Result<()> {
    let Some(job) = store.load_job().await? else {
        println!("no batch in store");
        return Ok(());
    };

    let state = match (job.active, job.paused) {
        (true, true) => "paused",
        (true, false) => "running",
        (false, _) => "finished",
    };
    let pass = if job.is_primary_pass { "primary" } else { "repair" };
    println!(
        "batch {}  {state}  {pass} pass  cursor {}/{}  page {}  updated {}",
        job.batch_id,
        job.cursor,
        job.targets.len(),
        job.page_number,
        job.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    for row in build_rows(store).await? {
        println!(
            "{:>4}  {:<28}  {:<10}  {} pages",
            row.position,
            truncate(&row.canonical_key, 28),
            row.status.to_string(),
            row.pages,
        );
    }
    Ok(())
}

async fn export(store: &SledJobStore, tsv: bool, out: Option<PathBuf>) -> Result<()> {
    let rows = build_rows(store).await?;
    if rows.is_empty() {
        anyhow::bail!("nothing to export");
    }
    let delimiter = if tsv { Delimiter::Tab } else { Delimiter::Comma };
    let rendered = render(&rows, delimiter);

    match out {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {} rows to {}", rows.len(), path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn signal(store: &SledJobStore, signal: ControlSignal) -> Result<()> {
    match apply_signal(store, signal).await? {
        ControlAck::Paused => println!("paused"),
        ControlAck::Resumed => println!("resumed"),
        ControlAck::Stopped => println!("stopped"),
        ControlAck::NoActiveJob => println!("no active batch"),
        other => println!("{other:?}"),
    }
    Ok(())
}

async fn clear(store: &SledJobStore) -> Result<()> {
    store.clear_batch().await?;
    println!("store cleared");
    Ok(())
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
