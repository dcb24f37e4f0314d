//! upqueue entry point.

mod app;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(&cli)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.post_url,
        concurrency = config.upload_concurrency,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(app::run(config, cli.files))?;

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        rejected = report.rejected,
        "upload finished"
    );
    if report.failed > 0 || report.rejected > 0 {
        std::process::exit(1);
    }
    Ok(())
}
