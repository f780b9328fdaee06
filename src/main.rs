use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use imgdrop::config::CloudConfig;
use imgdrop::hosted::{HostedClient, HostedEngine, UploadOptions};
use imgdrop::logging::init_logging;
use imgdrop::queue::{FileCandidate, FileStatus, QueueConfig, QueueEvent, UploadQueue};
use imgdrop::utils::format_bytes;

/// Upload images to the hosted media API.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Images to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Largest accepted file, in bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Accept only these MIME types (repeatable)
    #[arg(long = "allow")]
    allowed_types: Vec<String>,

    /// Override the destination folder
    #[arg(long)]
    folder: Option<String>,

    /// Comma separated tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = CloudConfig::from_env().context("Hosted API is not configured")?;
    if let Some(folder) = cli.folder.clone() {
        config.folder = folder;
    }

    let options = UploadOptions { tags: cli.tags.clone(), context: None };
    let client = HostedClient::new(&config, options)?;
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let engine = HostedEngine::new(client, engine_tx);

    let mut queue_config = QueueConfig::for_engine(&engine);
    if let Some(max_size) = cli.max_size {
        queue_config.validation.max_size = max_size;
    }
    if !cli.allowed_types.is_empty() {
        queue_config.validation.allowed_types = cli.allowed_types.clone();
    }

    let handle = UploadQueue::new(engine, engine_rx, queue_config);
    let queue = handle.queue.clone();
    let mut events = queue.subscribe_events();

    let mut candidates = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match FileCandidate::from_path(path).await {
            Ok(candidate) => candidates.push(Some(candidate)),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable file"),
        }
    }

    let report = queue.add_files(candidates).await?;
    for rejection in &report.rejected {
        eprintln!("rejected {}: {}", rejection.name.as_deref().unwrap_or("<none>"), rejection.error);
    }
    if report.admitted.is_empty() {
        anyhow::bail!("no files to upload");
    }

    queue.upload_all().await?;

    loop {
        match events.recv().await {
            Ok(QueueEvent::Progress(progress)) => {
                info!(
                    overall = progress.overall_progress,
                    done = progress.completed_count,
                    failed = progress.failed_count,
                    remaining = %progress.time_remaining,
                    "{} / {}",
                    format_bytes(progress.bytes_uploaded),
                    format_bytes(progress.total_bytes),
                );
                if progress.is_settled() {
                    break;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress events dropped");
                if queue.progress().await?.is_settled() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    for entry in queue.snapshot().iter() {
        match entry.status {
            FileStatus::Success => println!("{}\t{}", entry.name, entry.upload_url.as_deref().unwrap_or_default()),
            _ => println!("{}\tfailed: {}", entry.name, entry.error_message.as_deref().unwrap_or("unknown error")),
        }
    }

    drop(queue);
    handle.shutdown().await?;

    Ok(())
}
