//! Command line entry point.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

use igs_upload::{
    BatchOrchestrator, BatchSession, Config, HttpGateway,
    attach::SequenceFile,
    metadata::MetadataBatch,
    report,
    status::{FileUploadInfo, NotificationUploadInfo},
    store::{FileStore, Slot, StateStore},
    wizard::WizardState,
};

#[derive(Parser)]
#[command(name = "igs-upload", about = "Upload IGS sequence notifications")]
struct Cli {
    /// Path of config.toml (created with defaults when missing)
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload every row of a parsed metadata batch
    Upload {
        /// Parsed metadata batch (JSON)
        #[arg(long)]
        metadata: PathBuf,
        /// Directory holding the sequence files named in the metadata
        #[arg(long)]
        files: PathBuf,
        /// Write the result report into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the results of the last batch
    Results {
        /// Write the result report into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Forget the stored results of the last batch
    Reset,
}

/// Log to a file; the returned guard must outlive the program.
fn init_logging() -> Result<WorkerGuard> {
    let log_file = "igs_upload.log";
    // stdout is reserved for progress output
    let file_appender = tracing_appender::rolling::never(".", log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    tracing::info!("logging to {}", log_file);
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging()?;
    let cli = Cli::parse();
    tracing::info!("app starting");

    let cfg = Config::load_or_default(&cli.config)?;
    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(&cfg.storage.state_dir));
    let session = Arc::new(BatchSession::new(store.clone()));

    let res = match cli.command {
        Commands::Upload {
            metadata,
            files,
            out,
        } => upload(&cfg, session, &metadata, &files, out.as_deref()).await,
        Commands::Results { out } => results(&cfg, session, out.as_deref()),
        Commands::Reset => reset(store.as_ref()),
    };
    if let Err(ref e) = res {
        tracing::error!("app error: {e:#}");
    }
    tracing::info!("app exiting");
    res
}

async fn upload(
    cfg: &Config,
    session: Arc<BatchSession>,
    metadata: &Path,
    dir: &Path,
    out: Option<&Path>,
) -> Result<()> {
    let mut wizard = WizardState::new(session.clone(), cfg.upload.max_file_size_bytes);
    wizard.use_parsed_batch(MetadataBatch::load(metadata)?);
    if !wizard.proceed() {
        bail!("{} contains no rows", metadata.display());
    }

    for rejected in wizard.attach_files(sequence_files(dir).await?) {
        println!("skipped: {rejected}");
    }
    if !wizard.proceed() {
        bail!(
            "not every sequence file named in the metadata was found in {}",
            dir.display()
        );
    }

    let http = reqwest::Client::new();
    let gateway = Arc::new(HttpGateway::new(http, &cfg.gateway));
    let orchestrator = BatchOrchestrator::new(gateway, session.clone(), cfg.poll_policy());

    // Ctrl-C cancels; the running row stops at its next checkpoint.
    let ctrl_c = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("cancelling upload...");
                session.cancel();
            }
        })
    };
    let printer = tokio::spawn(print_progress(
        session.subscribe_notifications(),
        session.subscribe_file_uploads(),
    ));

    let batch = wizard.batch().context("no metadata batch")?;
    let summary = orchestrator.upload_notifications(batch, wizard.files()).await;
    ctrl_c.abort();
    printer.abort();
    let summary = summary?;

    if session.is_cancelled() {
        wizard.cancel();
    } else {
        wizard.proceed();
    }
    println!(
        "{} rows: {} succeeded, {} failed, {} aborted",
        summary.total, summary.succeeded, summary.failed, summary.aborted
    );
    print_report(&session, out)
}

fn results(cfg: &Config, session: Arc<BatchSession>, out: Option<&Path>) -> Result<()> {
    if !session.last_results_available() {
        println!("no results of a previous batch are stored");
        return Ok(());
    }
    let mut wizard = WizardState::new(session.clone(), cfg.upload.max_file_size_bytes);
    wizard.proceed_to_result_step()?;
    print_report(&session, out)
}

fn reset(store: &dyn StateStore) -> Result<()> {
    for slot in Slot::ALL {
        store.save(slot, "")?;
    }
    println!("stored results removed");
    Ok(())
}

fn print_report(session: &BatchSession, out: Option<&Path>) -> Result<()> {
    let records = report::export_records(&session.notifications(), &session.upload_errors());
    for r in &records {
        println!(
            "{:>4}  {:<8}  {:<24}  {:<24}  {}",
            r.row_number, r.status, r.upload_timestamp, r.demis_sequence_id, r.errors
        );
    }
    if let Some(dir) = out {
        // restored batches carry no finish time
        let finished_at = session.finished_at().unwrap_or_else(Utc::now);
        let path = report::write_report(dir, finished_at, &records)?;
        println!("report written to {}", path.display());
    }
    Ok(())
}

/// Regular files of `dir`, by name.
async fn sequence_files(dir: &Path) -> Result<Vec<SequenceFile>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(SequenceFile::from_path(&entry.path()).await?);
        }
    }
    Ok(files)
}

/// Print row and file status changes until aborted.
async fn print_progress(
    mut rows: watch::Receiver<Vec<NotificationUploadInfo>>,
    mut files: watch::Receiver<Vec<FileUploadInfo>>,
) {
    let mut last_rows: Vec<NotificationUploadInfo> = Vec::new();
    let mut last_files: Vec<FileUploadInfo> = Vec::new();
    loop {
        tokio::select! {
            changed = rows.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = rows.borrow_and_update().clone();
                for r in current.iter().filter(|r| !last_rows.contains(*r)) {
                    println!("row {:>4}  {}", r.row_number, r.status);
                }
                last_rows = current;
            }
            changed = files.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = files.borrow_and_update().clone();
                for f in &current {
                    let before = last_files.iter().find(|l| l.file_name == f.file_name);
                    if before.is_none_or(|b| b.status != f.status) {
                        println!("  {}  {} {}%", f.file_name, f.status, f.progress);
                    }
                }
                last_files = current;
            }
        }
    }
}
