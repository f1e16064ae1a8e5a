//! lensmark-listener CLI entry point.

mod cli;

use alloy::primitives::Address;
use clap::Parser;
use cli::Cli;
use color_eyre::eyre::WrapErr;
use lensmark::listener::{HttpRelay, ReconciliationListener, WsTransport};
use std::str::FromStr;
use std::sync::Arc;
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

    info!("lensmark-listener v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config()?;
    let registration_resolver = Address::from_str(&config.ledger.registration_resolver)
        .wrap_err("invalid registration resolver address")?;
    let purchase_resolver = Address::from_str(&config.ledger.purchase_resolver)
        .wrap_err("invalid purchase resolver address")?;

    let transport = Arc::new(WsTransport::new(
        config.ledger.rpc_ws_url.clone(),
        registration_resolver,
        purchase_resolver,
    ));
    let relay = Arc::new(HttpRelay::new(&config.listener)?);
    let listener =
        ReconciliationListener::new(transport, relay, config.listener.reconnect_delay());

    listener.start();
    lensmark::server::shutdown_signal().await;
    listener.stop().await;

    info!("Goodbye!");
    Ok(())
}
