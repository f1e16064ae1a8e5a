//! Service assembly: storage, signer, reconciler and HTTP surface wired together.

use crate::artifact::{ArtifactIssuer, ImageTranscoder, LinkIssuer};
use crate::config::MarketConfig;
use crate::error::{Error, Result};
use crate::market::MarketService;
use crate::reconciler::{LogNotifier, Reconciler};
use crate::schema::SchemaRegistry;
use crate::server::{self, AppState};
use crate::signer::{DelegatedSigner, EasLedger, LocalCustodyKey};
use crate::storage::{FsBlobStore, FsContentStore, MarketStore, SqliteStore};
use alloy::primitives::Address;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Builder for the marketplace service.
pub struct ServiceBuilder {
    config: MarketConfig,
}

impl ServiceBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: MarketConfig) -> Self {
        Self { config }
    }

    /// Open storage, connect to the ledger and assemble the service.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened, the schema file or
    /// custody key is invalid, the ledger is unreachable, or the internal
    /// token is unset.
    pub async fn build(self) -> Result<RunningService> {
        info!(
            "Building lensmark node (listen={}, chain_id={})",
            self.config.server.listen_addr, self.config.ledger.chain_id
        );

        if self.config.listener.internal_token.is_empty() {
            return Err(Error::Config(
                "internal bearer token is required to accept relayed events".to_string(),
            ));
        }

        std::fs::create_dir_all(&self.config.storage.blob_dir)?;
        std::fs::create_dir_all(&self.config.storage.content_dir)?;

        let store: Arc<dyn MarketStore> =
            Arc::new(SqliteStore::open(&self.config.storage.database_path).await?);
        let blobs = Arc::new(FsBlobStore::new(&self.config.storage.blob_dir));
        let content = Arc::new(FsContentStore::new(&self.config.storage.content_dir));

        let registry = Arc::new(SchemaRegistry::from_file(&self.config.signing.schema_file)?);
        let custody = Arc::new(LocalCustodyKey::from_secret(
            &self.config.signing.custody_key,
        )?);
        let eas = Address::from_str(&self.config.ledger.eas_address).map_err(|e| {
            Error::Config(format!(
                "invalid attestation service address {:?}: {e}",
                self.config.ledger.eas_address
            ))
        })?;
        let ledger = Arc::new(EasLedger::connect(&self.config.ledger.rpc_ws_url, eas).await?);
        let signer = Arc::new(DelegatedSigner::new(
            &self.config.ledger,
            &self.config.signing,
            registry,
            custody,
            ledger,
        )?);

        let links = Arc::new(LinkIssuer::new(store.clone(), &self.config.links));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            links.clone(),
            Arc::new(LogNotifier),
            &self.config.links,
        ));
        let artifacts = Arc::new(ArtifactIssuer::new(
            store.clone(),
            blobs.clone(),
            content,
            Arc::new(ImageTranscoder),
        ));
        let market = Arc::new(MarketService::new(
            store.clone(),
            signer,
            artifacts,
            links.clone(),
            &self.config.links,
        ));

        let state = AppState {
            reconciler,
            links,
            store,
            blobs,
            internal_token: self.config.listener.internal_token.clone(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(RunningService {
            config: self.config,
            state,
            market,
            shutdown_tx,
            shutdown_rx,
        })
    }
}

/// An assembled marketplace service.
pub struct RunningService {
    config: MarketConfig,
    state: AppState,
    market: Arc<MarketService>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RunningService {
    /// Wrap already-built components. Used by embedders and tests that bring
    /// their own ledger.
    #[must_use]
    pub fn from_parts(config: MarketConfig, state: AppState, market: Arc<MarketService>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            state,
            market,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Marketplace operations for the user-facing layer.
    #[must_use]
    pub fn market(&self) -> Arc<MarketService> {
        Arc::clone(&self.market)
    }

    /// Router over the service's HTTP surface.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        server::create_router(self.state.clone())
    }

    /// Serve HTTP and prune expired links until shutdown is requested or a
    /// termination signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the listening address cannot be bound.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting lensmark node");

        let prune = tokio::spawn(prune_loop(
            Arc::clone(&self.state.links),
            Duration::from_secs(self.config.links.prune_interval_secs.max(1)),
            self.shutdown_rx.clone(),
        ));

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let shutdown = async move {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Shutdown requested");
                }
                () = server::shutdown_signal() => {
                    let _ = shutdown_tx.send(true);
                }
            }
        };

        let result = server::serve(self.router(), self.config.server.listen_addr, shutdown).await;

        self.shutdown();
        if let Err(e) = prune.await {
            warn!("Prune task ended abnormally: {e}");
        }
        info!("Node shutdown complete");
        result
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn prune_loop(
    links: Arc<LinkIssuer>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match links.prune_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => debug!("Pruned {removed} expired download links"),
                    Err(e) => warn!("Pruning expired links failed: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Secret;

    #[tokio::test]
    async fn test_build_requires_internal_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MarketConfig::default();
        config.storage.database_path = dir.path().join("lensmark.db");
        config.storage.blob_dir = dir.path().join("blobs");
        config.storage.content_dir = dir.path().join("content");

        let result = ServiceBuilder::new(config).build().await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_missing_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MarketConfig::default();
        config.listener.internal_token = Secret::new("token");
        config.storage.database_path = dir.path().join("db").join("lensmark.db");
        config.storage.blob_dir = dir.path().join("blobs");
        config.storage.content_dir = dir.path().join("content");
        config.signing.schema_file = dir.path().join("absent.json");

        let result = ServiceBuilder::new(config).build().await;
        assert!(result.is_err());
        assert!(dir.path().join("db").join("lensmark.db").exists());
    }

    #[tokio::test]
    async fn test_prune_loop_stops_on_shutdown() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let links = Arc::new(LinkIssuer::new(
            store,
            &crate::config::LinkConfig::default(),
        ));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(prune_loop(links, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
