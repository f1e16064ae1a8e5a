//! lensmark-node CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use lensmark::ServiceBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("lensmark-node v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config()?;

    let mut service = ServiceBuilder::new(config).build().await?;
    service.run().await?;

    info!("Goodbye!");
    Ok(())
}
