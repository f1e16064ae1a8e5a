//! Test harness wiring the whole pipeline in one process.
//!
//! The `TestHarness` replaces the two external parties with in-memory
//! doubles: a scripted ledger that answers signer queries, and a channel
//! standing in for the websocket log subscription. Everything between them
//! is the real code:
//!
//! ```text
//! MarketService ──bundle──► (test submits) ──log──► ReconciliationListener
//!                                                        │ relay
//!                                                        ▼
//!                        GET /download/{token} ◄── router (Reconciler, LinkIssuer)
//! ```

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use http_body_util::BodyExt;
use lensmark::artifact::{ArtifactIssuer, ImageTranscoder, LinkIssuer};
use lensmark::config::{LedgerConfig, MarketConfig, SigningConfig};
use lensmark::listener::{EventRelay, EventTransport, LedgerLog, LogStream};
use lensmark::reconciler::{LogNotifier, Reconciler};
use lensmark::schema::{RegisteredSchema, SchemaRegistry};
use lensmark::server::AppState;
use lensmark::signer::{AttestationLedger, DelegatedSigner, LocalCustodyKey, OnChainAttestation};
use lensmark::storage::{
    BlobStore, FsBlobStore, FsContentStore, Listing, MarketStore, NewListing, NewUser,
    SqliteStore, StorageMedium, User,
};
use lensmark::{
    ConfirmedEvent, Error, ListenerEvent, MarketService, ReconcileStatus, Reconciliation,
    ReconciliationListener, RunningService, Secret,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use tracing::info;

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Service error.
    #[error("Service error: {0}")]
    Service(#[from] Error),

    /// The pipeline did not report back in time.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The simulated subscription is closed.
    #[error("Log feed closed")]
    FeedClosed,
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Bearer token shared by the relay and the node.
pub const INTERNAL_TOKEN: &str = "e2e-internal-token";

/// Wallet of the seeded photographer.
pub const OWNER_WALLET: Address = Address::repeat_byte(0x11);

/// Wallet of the seeded buyer.
pub const BUYER_WALLET: Address = Address::repeat_byte(0x22);

const LISTING_SCHEMA: &str =
    "bytes32 fingerprintHash,bytes32 contentFingerprint,bool isContentAddressed,uint256 priceAmount";
const PURCHASE_SCHEMA: &str =
    "bytes32 fingerprintHash,bytes32 contentFingerprint,bool isContentAddressed,bytes32 auxData";

const RELAY_WAIT: Duration = Duration::from_secs(5);

/// A 1x1 grayscale PNG.
pub const TINY_PNG: [u8; 67] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x00, 0x00, 0x00, 0x00, 0x3a,
    0x7e, 0x9b, 0x55, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x60,
    0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x48, 0xaf, 0xa4, 0x71, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Ledger double: attestations the test has "mined", nonce always zero.
#[derive(Default)]
pub struct ScriptedLedger {
    attestations: Mutex<HashMap<B256, OnChainAttestation>>,
}

impl ScriptedLedger {
    /// Record an attestation as existing on-chain.
    pub fn mine(&self, uid: B256, schema: B256) {
        self.attestations.lock().insert(
            uid,
            OnChainAttestation {
                uid,
                schema,
                revocable: true,
                revoked: false,
            },
        );
    }

    /// Flag an attestation as revoked.
    pub fn revoke(&self, uid: B256) {
        if let Some(attestation) = self.attestations.lock().get_mut(&uid) {
            attestation.revoked = true;
        }
    }
}

#[async_trait]
impl AttestationLedger for ScriptedLedger {
    async fn attestation(&self, uid: B256) -> lensmark::Result<Option<OnChainAttestation>> {
        Ok(self.attestations.lock().get(&uid).copied())
    }

    async fn nonce(&self, _account: Address) -> lensmark::Result<U256> {
        Ok(U256::ZERO)
    }
}

/// Transport double: one subscription fed from a channel. Later subscribe
/// attempts fail so the listener keeps retrying.
struct ChannelTransport {
    feed: Mutex<Option<mpsc::UnboundedReceiver<LedgerLog>>>,
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn subscribe(&self) -> lensmark::Result<LogStream> {
        let rx = self
            .feed
            .lock()
            .take()
            .ok_or_else(|| Error::Listener("feed already consumed".to_string()))?;
        Ok(rx.map(Ok).boxed())
    }
}

/// Relay that posts straight into the node's router.
struct RouterRelay {
    router: Router,
}

#[async_trait]
impl EventRelay for RouterRelay {
    async fn relay(&self, event: &ConfirmedEvent) -> lensmark::Result<ReconcileStatus> {
        let body = serde_json::to_vec(&event.to_json()?)?;
        let request = Request::post(event.kind().relay_path())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {INTERNAL_TOKEN}"))
            .body(Body::from(body))
            .map_err(|e| Error::Relay(e.to_string()))?;

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(Error::Relay(format!("relay returned {}", response.status())));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?
            .to_bytes();
        let reconciliation: Reconciliation = serde_json::from_slice(&body)?;
        Ok(reconciliation.status)
    }
}

/// Test harness that manages the complete pipeline.
pub struct TestHarness {
    /// Marketplace database.
    pub store: Arc<dyn MarketStore>,
    /// Ledger double.
    pub ledger: Arc<ScriptedLedger>,
    /// Assembled node.
    pub service: RunningService,
    /// Listener relaying into the node.
    pub listener: ReconciliationListener,
    /// Seeded photographer.
    pub owner: User,
    /// Seeded buyer.
    pub buyer: User,
    /// Seeded listing owned by `owner`, not yet registered.
    pub listing: Listing,
    /// Schema uid of listing registrations.
    pub listing_schema_uid: B256,
    feed: mpsc::UnboundedSender<LedgerLog>,
    _dir: TempDir,
}

impl TestHarness {
    /// Build the pipeline, seed one owner, one buyer and one listing, and
    /// start the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to initialize.
    pub async fn setup() -> Result<Self> {
        let dir = tempfile::tempdir().map_err(Error::from)?;
        let mut config = MarketConfig::default();
        config.listener.internal_token = Secret::new(INTERNAL_TOKEN);
        config.listener.reconnect_delay_secs = 1;

        let store: Arc<dyn MarketStore> = Arc::new(SqliteStore::in_memory().await?);
        let blobs = Arc::new(FsBlobStore::new(dir.path().join("blobs")));
        let content = Arc::new(FsContentStore::new(dir.path().join("content")));

        let listing_schema_uid = B256::repeat_byte(0x01);
        let registry = SchemaRegistry::from_schemas([
            RegisteredSchema::new("listing", LISTING_SCHEMA, listing_schema_uid, Address::ZERO)?,
            RegisteredSchema::new(
                "purchase",
                PURCHASE_SCHEMA,
                B256::repeat_byte(0x02),
                Address::ZERO,
            )?,
        ]);
        let ledger = Arc::new(ScriptedLedger::default());
        let signer = DelegatedSigner::new(
            &LedgerConfig {
                eas_address: format!("0x{}", "ea".repeat(20)),
                ..LedgerConfig::default()
            },
            &SigningConfig::default(),
            Arc::new(registry),
            Arc::new(LocalCustodyKey::random()),
            ledger.clone(),
        )?;

        let links = Arc::new(LinkIssuer::new(store.clone(), &config.links));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            links.clone(),
            Arc::new(LogNotifier),
            &config.links,
        ));
        let artifacts = Arc::new(ArtifactIssuer::new(
            store.clone(),
            blobs.clone(),
            content,
            Arc::new(ImageTranscoder),
        ));
        let market = Arc::new(MarketService::new(
            store.clone(),
            Arc::new(signer),
            artifacts,
            links.clone(),
            &config.links,
        ));
        let state = AppState {
            reconciler,
            links,
            store: store.clone(),
            blobs: blobs.clone(),
            internal_token: config.listener.internal_token.clone(),
        };
        let reconnect_delay = config.listener.reconnect_delay();
        let service = RunningService::from_parts(config, state, market);

        let (feed, rx) = mpsc::unbounded();
        let listener = ReconciliationListener::new(
            Arc::new(ChannelTransport {
                feed: Mutex::new(Some(rx)),
            }),
            Arc::new(RouterRelay {
                router: service.router(),
            }),
            reconnect_delay,
        );
        listener.start();

        blobs
            .put("originals/harbour.png", Bytes::from_static(&TINY_PNG))
            .await?;
        let owner = store
            .create_user(&NewUser {
                username: "ana".to_string(),
                email: "ana@example.com".to_string(),
                wallet_address: OWNER_WALLET.to_string(),
                attestation_ref: None,
            })
            .await?;
        let buyer = store
            .create_user(&NewUser {
                username: "ben".to_string(),
                email: "ben@example.com".to_string(),
                wallet_address: BUYER_WALLET.to_string(),
                attestation_ref: None,
            })
            .await?;
        let listing = store
            .create_listing(&NewListing {
                owner_id: owner.id,
                title: "Harbour at dawn".to_string(),
                original_name: "harbour.png".to_string(),
                mime_type: "image/png".to_string(),
                content_fingerprint: "ab".repeat(32),
                medium: StorageMedium::Conventional,
                locator: "originals/harbour.png".to_string(),
                price: "0.05".to_string(),
            })
            .await?;

        info!("Test harness ready (listing {})", listing.id);
        Ok(Self {
            store,
            ledger,
            service,
            listener,
            owner,
            buyer,
            listing,
            listing_schema_uid,
            feed,
            _dir: dir,
        })
    }

    /// Marketplace operations.
    #[must_use]
    pub fn market(&self) -> Arc<MarketService> {
        self.service.market()
    }

    /// Deliver `log` through the simulated subscription and wait for the
    /// listener to report what happened to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed is closed or the listener stays silent.
    pub async fn emit(&self, log: LedgerLog) -> Result<ListenerEvent> {
        let mut events = self.listener.subscribe_events();
        self.feed
            .unbounded_send(log)
            .map_err(|_| HarnessError::FeedClosed)?;

        tokio::time::timeout(RELAY_WAIT, async {
            loop {
                match events.recv().await {
                    Ok(ListenerEvent::StateChanged { .. }) => {}
                    Ok(other) => return Ok(other),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(HarnessError::FeedClosed)
                    }
                }
            }
        })
        .await
        .map_err(|_| HarnessError::Timeout("listener report".to_string()))?
    }

    /// Deliver `log` and return the reconciler's verdict.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay failed or the log was discarded.
    pub async fn relay(&self, log: LedgerLog) -> Result<ReconcileStatus> {
        match self.emit(log).await? {
            ListenerEvent::Relayed { status, .. } => Ok(status),
            other => Err(HarnessError::Timeout(format!(
                "a relayed event, got {other:?}"
            ))),
        }
    }

    /// Fetch `/download/{token}` from the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be built.
    pub async fn download(&self, token: &str) -> Result<(StatusCode, axum::http::HeaderMap, Bytes)> {
        let request = Request::get(format!("/download/{token}"))
            .body(Body::empty())
            .map_err(|e| Error::Relay(e.to_string()))?;
        let response = self
            .service
            .router()
            .oneshot(request)
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?
            .to_bytes();
        Ok((status, headers, body))
    }

    /// Stop the listener.
    pub async fn teardown(self) {
        self.listener.stop().await;
    }
}
