//! Sender entry point: prepares files into staged chunk artifacts,
//! queues them by priority, and drains the queue against a receiver.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chunkferry_codec::TransferKey;
use chunkferry_config::TransferConfig;
use chunkferry_protocol::status::Role;
use chunkferry_protocol::Priority;
use chunkferry_sched::{JobQueue, JobState, TransferJob};
use chunkferry_store::{prepare_file, ChunkStore};
use chunkferry_transfer::{run_queue, StatusWriter};

#[derive(Parser)]
#[command(name = "chunkferry-sender", version, about = "Send files to a chunkferry receiver")]
struct Cli {
    /// Files to transfer.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Receiver host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Receiver port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file.
    #[arg(long, default_value = "transfer.toml")]
    config: PathBuf,

    /// Priority for these files: critical, high, normal, or low.
    /// Defaults to the configured priority.
    #[arg(long)]
    priority: Option<Priority>,

    /// Directory for staged chunk artifacts.
    #[arg(long, default_value = "staging")]
    staging: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = TransferConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let key = TransferKey::load(&config.security.key_file).with_context(|| {
        format!("loading key from {}", config.security.key_file.display())
    })?;
    let priority = cli.priority.unwrap_or(config.priority.default);

    let mut queue = JobQueue::new();
    for src in &cli.files {
        let file_name = src
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("invalid file path {}", src.display()))?;
        let chunk_dir = cli.staging.join(format!("{file_name}.chunks"));
        let store = ChunkStore::at(&chunk_dir)?;
        let manifest = prepare_file(
            src,
            &store,
            config.transfer.chunk_size,
            &key,
            priority,
            config.compression.enabled,
            config.compression.level,
        )
        .with_context(|| format!("preparing {}", src.display()))?;
        queue.enqueue(TransferJob::new(manifest, chunk_dir));
    }

    let addr = format!("{}:{}", cli.host, cli.port.unwrap_or(config.network.port));
    let status = StatusWriter::new(&config.monitoring.status_dir, Role::Sender);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            signal_cancel.cancel();
        }
    });

    let reports = run_queue(&addr, queue, &config, &status, &cancel).await;

    let mut failed = 0usize;
    for report in &reports {
        match &report.state {
            JobState::Completed => tracing::info!(
                file = %report.file_name,
                priority = %report.priority,
                attempts = report.attempts,
                "transfer complete"
            ),
            JobState::Failed(reason) => {
                failed += 1;
                tracing::error!(
                    file = %report.file_name,
                    attempts = report.attempts,
                    reason = %reason,
                    "transfer failed"
                );
            }
            other => tracing::warn!(file = %report.file_name, state = ?other, "job not finished"),
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} transfer(s) failed", reports.len());
    }
    Ok(())
}
