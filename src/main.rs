mod classifier;
mod cli;
mod config;
mod error;
mod model;
mod orchestrator;
mod rooms;
mod storage;
mod stream;
mod text_summary;
mod worker;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `status --json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();
    cli::run(args).await
}
