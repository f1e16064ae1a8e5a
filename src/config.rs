//! Configuration for lensmark.
//!
//! A [`MarketConfig`] value is built once at startup (file + environment +
//! flags) and passed by reference into every component constructor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// A secret string that never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<unset>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Ledger endpoints and contract addresses.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Delegated signing configuration.
    #[serde(default)]
    pub signing: SigningConfig,

    /// Reconciliation listener configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Download link defaults.
    #[serde(default)]
    pub links: LinkConfig,

    /// Database and blob storage locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Websocket RPC endpoint.
    #[serde(default = "default_rpc_ws_url")]
    pub rpc_ws_url: String,

    /// Chain id used in the EIP-712 domain.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Attestation service contract address.
    #[serde(default)]
    pub eas_address: String,

    /// EIP-712 domain version of the attestation service contract.
    #[serde(default = "default_eas_version")]
    pub eas_version: String,

    /// Resolver contract emitting listing registration/revocation events.
    #[serde(default)]
    pub registration_resolver: String,

    /// Resolver contract emitting purchase events.
    #[serde(default)]
    pub purchase_resolver: String,
}

/// Delegated signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Hex-encoded secp256k1 custody key.
    #[serde(default)]
    pub custody_key: Secret,

    /// JSON file mapping schema names to registered schemas.
    #[serde(default = "default_schema_file")]
    pub schema_file: PathBuf,

    /// Name of the listing registration schema.
    #[serde(default = "default_listing_schema")]
    pub listing_schema: String,

    /// Name of the purchase schema.
    #[serde(default = "default_purchase_schema")]
    pub purchase_schema: String,

    /// Seconds a signed request stays valid.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// Reconciliation listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Base URL of the reconciler's internal endpoints.
    #[serde(default = "default_reconciler_url")]
    pub reconciler_url: String,

    /// Bearer token authenticating relay calls.
    #[serde(default)]
    pub internal_token: Secret,

    /// Fixed delay before reconnecting after a transport failure.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Timeout of a single relay call.
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,
}

/// Download link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Public base URL download tokens are appended to.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Gateway serving content-addressed files.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Validity of a conventional link, in hours.
    #[serde(default = "default_valid_hours")]
    pub valid_hours: u32,

    /// Validity of the link granted right after a confirmed purchase.
    #[serde(default = "default_purchase_valid_hours")]
    pub purchase_valid_hours: u32,

    /// Consumption ceiling of a conventional link.
    #[serde(default = "default_max_downloads")]
    pub max_downloads: u32,

    /// Interval between expired-link pruning passes, in seconds.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory of conventional blob storage.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// Root directory of the content-addressed store.
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_ws_url: default_rpc_ws_url(),
            chain_id: default_chain_id(),
            eas_address: String::new(),
            eas_version: default_eas_version(),
            registration_resolver: String::new(),
            purchase_resolver: String::new(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            custody_key: Secret::default(),
            schema_file: default_schema_file(),
            listing_schema: default_listing_schema(),
            purchase_schema: default_purchase_schema(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            reconciler_url: default_reconciler_url(),
            internal_token: Secret::default(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            relay_timeout_secs: default_relay_timeout_secs(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            gateway_url: default_gateway_url(),
            valid_hours: default_valid_hours(),
            purchase_valid_hours: default_purchase_valid_hours(),
            max_downloads: default_max_downloads(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            blob_dir: default_blob_dir(),
            content_dir: default_content_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl ListenerConfig {
    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Relay timeout as a [`Duration`].
    #[must_use]
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "lensmark")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lensmark"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_ws_url() -> String {
    "ws://127.0.0.1:8546".to_string()
}

const fn default_chain_id() -> u64 {
    11_155_111 // sepolia
}

fn default_eas_version() -> String {
    "1.3.0".to_string()
}

fn default_schema_file() -> PathBuf {
    data_dir().join("schemas.json")
}

fn default_listing_schema() -> String {
    "listing".to_string()
}

fn default_purchase_schema() -> String {
    "purchase".to_string()
}

const fn default_deadline_secs() -> u64 {
    3600
}

fn default_reconciler_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

const fn default_reconnect_delay_secs() -> u64 {
    5
}

const fn default_relay_timeout_secs() -> u64 {
    30
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/download".to_string()
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud/ipfs".to_string()
}

const fn default_valid_hours() -> u32 {
    24
}

const fn default_purchase_valid_hours() -> u32 {
    48
}

const fn default_max_downloads() -> u32 {
    1
}

const fn default_prune_interval_secs() -> u64 {
    600
}

fn default_database_path() -> PathBuf {
    data_dir().join("lensmark.db")
}

fn default_blob_dir() -> PathBuf {
    data_dir().join("blobs")
}

fn default_content_dir() -> PathBuf {
    data_dir().join("content")
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl MarketConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
