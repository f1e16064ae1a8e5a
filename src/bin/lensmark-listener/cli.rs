//! Command-line interface definition.

use clap::Parser;
use lensmark::config::MarketConfig;
use lensmark::Secret;
use std::path::PathBuf;

/// Relays confirmed resolver events from the ledger to a lensmark node.
#[derive(Parser, Debug)]
#[command(name = "lensmark-listener")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "LENSMARK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Websocket RPC endpoint of the ledger.
    #[arg(long, env = "LENSMARK_RPC_WS_URL")]
    pub rpc_ws_url: Option<String>,

    /// Resolver contract emitting registration and removal events.
    #[arg(long, env = "LENSMARK_REGISTRATION_RESOLVER")]
    pub registration_resolver: Option<String>,

    /// Resolver contract emitting purchase events.
    #[arg(long, env = "LENSMARK_PURCHASE_RESOLVER")]
    pub purchase_resolver: Option<String>,

    /// Base URL of the node's internal endpoints.
    #[arg(long, env = "LENSMARK_RECONCILER_URL")]
    pub reconciler_url: Option<String>,

    /// Bearer token presented on relay calls.
    #[arg(long, env = "LENSMARK_INTERNAL_TOKEN", hide_env_values = true)]
    pub internal_token: Option<String>,

    /// Seconds to wait before reconnecting after a lost subscription.
    #[arg(long, env = "LENSMARK_RECONNECT_DELAY")]
    pub reconnect_delay: Option<u64>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LENSMARK_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Convert CLI arguments into a [`MarketConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<MarketConfig> {
        let mut config = if let Some(ref path) = self.config {
            MarketConfig::from_file(path)?
        } else {
            MarketConfig::default()
        };

        if let Some(url) = self.rpc_ws_url {
            config.ledger.rpc_ws_url = url;
        }
        if let Some(address) = self.registration_resolver {
            config.ledger.registration_resolver = address;
        }
        if let Some(address) = self.purchase_resolver {
            config.ledger.purchase_resolver = address;
        }
        if let Some(url) = self.reconciler_url {
            config.listener.reconciler_url = url;
        }
        if let Some(token) = self.internal_token {
            config.listener.internal_token = Secret::new(token);
        }
        if let Some(secs) = self.reconnect_delay {
            config.listener.reconnect_delay_secs = secs;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
