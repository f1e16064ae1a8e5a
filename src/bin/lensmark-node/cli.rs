//! Command-line interface definition.

use clap::Parser;
use lensmark::config::MarketConfig;
use lensmark::Secret;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Photo marketplace node: delegated signing, reconciliation and downloads.
#[derive(Parser, Debug)]
#[command(name = "lensmark-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "LENSMARK_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listening address.
    #[arg(long, env = "LENSMARK_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Websocket RPC endpoint of the ledger.
    #[arg(long, env = "LENSMARK_RPC_WS_URL")]
    pub rpc_ws_url: Option<String>,

    /// Chain id used in the EIP-712 domain.
    #[arg(long, env = "LENSMARK_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Attestation service contract address.
    #[arg(long, env = "LENSMARK_EAS_ADDRESS")]
    pub eas_address: Option<String>,

    /// JSON file of registered schemas.
    #[arg(long, env = "LENSMARK_SCHEMA_FILE")]
    pub schema_file: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long, env = "LENSMARK_DATABASE")]
    pub database: Option<PathBuf>,

    /// Root directory of conventional blob storage.
    #[arg(long, env = "LENSMARK_BLOB_DIR")]
    pub blob_dir: Option<PathBuf>,

    /// Hex-encoded custody key.
    #[arg(long, env = "LENSMARK_CUSTODY_KEY", hide_env_values = true)]
    pub custody_key: Option<String>,

    /// Bearer token the listener presents on relay calls.
    #[arg(long, env = "LENSMARK_INTERNAL_TOKEN", hide_env_values = true)]
    pub internal_token: Option<String>,

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

        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(url) = self.rpc_ws_url {
            config.ledger.rpc_ws_url = url;
        }
        if let Some(chain_id) = self.chain_id {
            config.ledger.chain_id = chain_id;
        }
        if let Some(address) = self.eas_address {
            config.ledger.eas_address = address;
        }
        if let Some(path) = self.schema_file {
            config.signing.schema_file = path;
        }
        if let Some(path) = self.database {
            config.storage.database_path = path;
        }
        if let Some(dir) = self.blob_dir {
            config.storage.blob_dir = dir;
        }
        if let Some(key) = self.custody_key {
            config.signing.custody_key = Secret::new(key);
        }
        if let Some(token) = self.internal_token {
            config.listener.internal_token = Secret::new(token);
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
