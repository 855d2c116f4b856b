//! Receiver entry point: listens for transfer sessions and restores
//! completed files into the output directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkferry_codec::TransferKey;
use chunkferry_config::TransferConfig;
use chunkferry_transfer::ReceiverServer;

#[derive(Parser)]
#[command(
    name = "chunkferry-receiver",
    version,
    about = "Receive chunkferry transfers"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "transfer.toml")]
    config: PathBuf,

    /// Directory where restored files are written.
    #[arg(long, default_value = "received")]
    output: PathBuf,

    /// Directory for in-flight chunk artifacts.
    #[arg(long, default_value = "incoming")]
    incoming: PathBuf,
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

    std::fs::create_dir_all(&cli.output)?;
    std::fs::create_dir_all(&cli.incoming)?;

    let server = ReceiverServer::new(&cli.incoming, &cli.output, key, config);

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    server.serve().await?;
    Ok(())
}
