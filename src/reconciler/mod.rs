//! Idempotent application of confirmed ledger events.
//!
//! Each event kind is keyed by the uid of its attestation. A re-delivered
//! event is recognised either by the [`ProcessedEvents`] cache or, failing
//! that, by the conditional update in the store that refuses to apply it a
//! second time.
//!
//! ```text
//! payload ──► cache hit? ──yes──► Duplicate
//!                 │
//!                 no
//!                 ▼
//!          locate records ──missing / mismatch──► Rejected (logged)
//!                 │
//!                 ▼
//!        conditional update ──no change──► Duplicate
//!                 │
//!              applied
//!                 ▼
//!        notify (+ link for purchases)
//! ```

mod cache;
mod notify;

pub use cache::{CacheStats, ProcessedEvents};
pub use notify::{LogNotifier, Notifier};

use crate::artifact::{LinkIssuer, LinkOptions};
use crate::config::LinkConfig;
use crate::confirmed::{
    ConfirmedEvent, EventKey, EventKind, PurchaseConfirmed, RegistrationConfirmed,
    RevocationConfirmed,
};
use crate::error::{Error, Result};
use crate::storage::{normalize_address, DownloadLink, MarketStore, NewTransaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStatus {
    /// State changed.
    Applied,
    /// The event had already been applied; nothing changed.
    Duplicate,
    /// The event does not match known state; nothing changed.
    Rejected,
}

/// Result of reconciling one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Status.
    pub status: ReconcileStatus,
    /// Human-readable detail.
    pub message: String,
    /// Download link issued for an applied purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<DownloadLink>,
}

impl Reconciliation {
    fn applied(message: impl Into<String>) -> Self {
        Self {
            status: ReconcileStatus::Applied,
            message: message.into(),
            link: None,
        }
    }

    fn duplicate(key: &EventKey) -> Self {
        Self {
            status: ReconcileStatus::Duplicate,
            message: format!("{key} already applied"),
            link: None,
        }
    }

    fn rejected(key: &EventKey, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(event = %key, "Rejected confirmed event: {reason}");
        Self {
            status: ReconcileStatus::Rejected,
            message: reason,
            link: None,
        }
    }

    /// Whether state changed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.status == ReconcileStatus::Applied
    }
}

/// Applies confirmed events to the store.
pub struct Reconciler {
    store: Arc<dyn MarketStore>,
    links: Arc<LinkIssuer>,
    notifier: Arc<dyn Notifier>,
    processed: ProcessedEvents,
    grant: LinkOptions,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketStore>,
        links: Arc<LinkIssuer>,
        notifier: Arc<dyn Notifier>,
        link_config: &LinkConfig,
    ) -> Self {
        Self {
            store,
            links,
            notifier,
            processed: ProcessedEvents::new(),
            grant: LinkOptions::purchase_grant(link_config),
        }
    }

    /// Processed-event cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.processed.stats()
    }

    /// Apply any confirmed event.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures.
    pub async fn apply(&self, event: &ConfirmedEvent) -> Result<Reconciliation> {
        match event {
            ConfirmedEvent::Registration(e) => self.apply_registration(e).await,
            ConfirmedEvent::Revocation(e) => self.apply_revocation(e).await,
            ConfirmedEvent::Purchase(e) => self.apply_purchase(e).await,
        }
    }

    /// Mark the listing with the event's fingerprint as attested.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures.
    pub async fn apply_registration(&self, event: &RegistrationConfirmed) -> Result<Reconciliation> {
        let key = EventKey::new(EventKind::Registration, &event.attestation_uid);
        if self.processed.contains(&key) {
            return Ok(Reconciliation::duplicate(&key));
        }
        let uid = event.attestation_uid.to_ascii_lowercase();

        let Some(listing) = self
            .store
            .listing_by_fingerprint(&event.content_fingerprint)
            .await?
        else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("no listing with fingerprint {}", event.content_fingerprint),
            ));
        };
        let Some(owner) = self.store.user(listing.owner_id).await? else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("owner of listing {} not found", listing.id),
            ));
        };
        if normalize_address(&owner.wallet_address) != normalize_address(&event.owner_address) {
            return Ok(Reconciliation::rejected(
                &key,
                format!(
                    "attested owner {} does not own listing {}",
                    event.owner_address, listing.id
                ),
            ));
        }

        match listing.attestation_ref.as_deref() {
            Some(existing) if existing == uid => {
                self.processed.insert(key.clone());
                return Ok(Reconciliation::duplicate(&key));
            }
            Some(existing) => {
                return Ok(Reconciliation::rejected(
                    &key,
                    format!("listing {} already attested as {existing}", listing.id),
                ));
            }
            None => {}
        }

        let applied = match self.store.mark_listing_attested(listing.id, &uid).await {
            Ok(applied) => applied,
            Err(Error::Conflict(reason)) => return Ok(Reconciliation::rejected(&key, reason)),
            Err(e) => return Err(e),
        };
        if !applied {
            // Lost a race with a concurrent delivery.
            let current = self.store.listing(listing.id).await?;
            if current.and_then(|l| l.attestation_ref).as_deref() == Some(uid.as_str()) {
                self.processed.insert(key.clone());
                return Ok(Reconciliation::duplicate(&key));
            }
            return Ok(Reconciliation::rejected(
                &key,
                format!("listing {} was attested concurrently", listing.id),
            ));
        }

        self.processed.insert(key.clone());
        info!(event = %key, "Listing {} attested", listing.id);
        if let Err(e) = self.notifier.listing_attested(&owner, &listing, &uid).await {
            warn!(event = %key, "Owner notification failed: {e}");
        }
        Ok(Reconciliation::applied(format!(
            "listing {} attested",
            listing.id
        )))
    }

    /// Mark the listing carrying the event's attestation as revoked.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures.
    pub async fn apply_revocation(&self, event: &RevocationConfirmed) -> Result<Reconciliation> {
        let key = EventKey::new(EventKind::Revocation, &event.attestation_uid);
        if self.processed.contains(&key) {
            return Ok(Reconciliation::duplicate(&key));
        }

        let Some(listing) = self
            .store
            .listing_by_attestation(&event.attestation_uid)
            .await?
        else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("no listing attested as {}", event.attestation_uid),
            ));
        };
        let Some(owner) = self.store.user(listing.owner_id).await? else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("owner of listing {} not found", listing.id),
            ));
        };
        if normalize_address(&owner.wallet_address) != normalize_address(&event.owner_address) {
            return Ok(Reconciliation::rejected(
                &key,
                format!(
                    "revoking wallet {} does not own listing {}",
                    event.owner_address, listing.id
                ),
            ));
        }

        let applied = self
            .store
            .mark_listing_revoked(&event.attestation_uid)
            .await?;
        self.processed.insert(key.clone());
        if !applied {
            return Ok(Reconciliation::duplicate(&key));
        }
        info!(event = %key, "Listing {} revoked", listing.id);
        Ok(Reconciliation::applied(format!(
            "listing {} revoked",
            listing.id
        )))
    }

    /// Record the purchase, then issue and announce the buyer's link.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures.
    pub async fn apply_purchase(&self, event: &PurchaseConfirmed) -> Result<Reconciliation> {
        let key = EventKey::new(EventKind::Purchase, &event.attestation_uid);
        if self.processed.contains(&key) {
            return Ok(Reconciliation::duplicate(&key));
        }

        if self
            .store
            .transaction_by_attestation(&event.attestation_uid)
            .await?
            .is_some()
        {
            self.processed.insert(key.clone());
            return Ok(Reconciliation::duplicate(&key));
        }

        let Some(buyer) = self.store.user_by_address(&event.buyer_address).await? else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("no user with wallet {}", event.buyer_address),
            ));
        };
        let Some(artifact) = self
            .store
            .artifact_by_fingerprint(&event.content_fingerprint)
            .await?
        else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("no generated artifact with fingerprint {}", event.content_fingerprint),
            ));
        };
        let Some(listing) = self.store.listing(artifact.listing_id).await? else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("listing {} of artifact {} not found", artifact.listing_id, artifact.id),
            ));
        };
        let Ok(block_number) = event.block_number.parse::<u64>() else {
            return Ok(Reconciliation::rejected(
                &key,
                format!("invalid block number {:?}", event.block_number),
            ));
        };

        let recorded = self
            .store
            .insert_transaction(&NewTransaction {
                buyer_id: buyer.id,
                artifact_id: artifact.id,
                attestation_ref: event.attestation_uid.clone(),
                tx_hash: event.tx_hash.clone(),
                block_hash: event.block_hash.clone(),
                block_number,
                fee_paid: event.fee_paid.clone(),
            })
            .await;
        let transaction = match recorded {
            Ok(transaction) => transaction,
            Err(Error::Conflict(reason)) => {
                // Replay of the same purchase, or a fresh collision.
                let existing = self
                    .store
                    .transaction_by_attestation(&event.attestation_uid)
                    .await?;
                return Ok(match existing {
                    Some(tx) if tx.tx_hash.eq_ignore_ascii_case(&event.tx_hash) => {
                        self.processed.insert(key.clone());
                        Reconciliation::duplicate(&key)
                    }
                    _ => Reconciliation::rejected(&key, reason),
                });
            }
            Err(e) => return Err(e),
        };

        self.processed.insert(key.clone());
        info!(
            event = %key,
            "Purchase of listing {} recorded as transaction {}",
            listing.id, transaction.id
        );
        if let Err(e) = self
            .notifier
            .purchase_confirmed(&buyer, &listing, &transaction)
            .await
        {
            warn!(event = %key, "Buyer notification failed: {e}");
        }

        // The purchase stands even if the link cannot be issued now; the
        // buyer can request one later.
        let link = match self
            .links
            .issue_or_reuse_download_link(artifact.id, buyer.id, self.grant)
            .await
        {
            Ok(link) => {
                if let Err(e) = self.notifier.download_ready(&buyer, &listing, &link).await {
                    warn!(event = %key, "Download notification failed: {e}");
                }
                Some(link)
            }
            Err(e) => {
                error!(event = %key, "Download link issuance failed: {e}");
                None
            }
        };

        Ok(Reconciliation {
            status: ReconcileStatus::Applied,
            message: format!("purchase recorded as transaction {}", transaction.id),
            link,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::artifact::issuer::tests::{fixture, Fixture};
    use crate::storage::{GeneratedArtifact, Listing, StorageMedium, Transaction, User};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn listing_attested(&self, owner: &User, _: &Listing, uid: &str) -> Result<()> {
            self.notices.lock().push(format!("attested:{}:{uid}", owner.username));
            Ok(())
        }

        async fn purchase_confirmed(&self, buyer: &User, _: &Listing, _: &Transaction) -> Result<()> {
            self.notices.lock().push(format!("purchased:{}", buyer.username));
            Ok(())
        }

        async fn download_ready(&self, buyer: &User, _: &Listing, link: &DownloadLink) -> Result<()> {
            self.notices
                .lock()
                .push(format!("link:{}:{}", buyer.username, link.medium));
            Ok(())
        }
    }

    struct Setup {
        f: Fixture,
        reconciler: Reconciler,
        notifier: Arc<RecordingNotifier>,
    }

    async fn setup() -> Setup {
        let f = fixture().await;
        let config = LinkConfig::default();
        let links = Arc::new(LinkIssuer::new(f.store.clone(), &config));
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Reconciler::new(f.store.clone(), links, notifier.clone(), &config);
        Setup {
            f,
            reconciler,
            notifier,
        }
    }

    fn registration(owner: &str) -> RegistrationConfirmed {
        RegistrationConfirmed {
            attestation_uid: format!("0x{}", "0a".repeat(32)),
            owner_address: owner.to_string(),
            content_fingerprint: "aa".repeat(32),
        }
    }

    fn purchase(buyer: &User, artifact: &GeneratedArtifact) -> PurchaseConfirmed {
        PurchaseConfirmed {
            attestation_uid: format!("0x{}", "0b".repeat(32)),
            buyer_address: buyer.wallet_address.clone(),
            listing_attestation_uid: format!("0x{}", "0a".repeat(32)),
            artifact_id_hash: format!("0x{}", "0c".repeat(32)),
            content_fingerprint: artifact.content_fingerprint.clone(),
            content_addressed: artifact.medium.is_content_addressed(),
            tx_hash: format!("0x{}", "0d".repeat(32)),
            block_hash: format!("0x{}", "0e".repeat(32)),
            block_number: "6120345".to_string(),
            fee_paid: Some("210000000000000".to_string()),
        }
    }

    async fn artifact(s: &Setup, content_addressed: bool) -> GeneratedArtifact {
        s.f.issuer
            .generate_purchase_artifact(
                &s.f.listing,
                &s.f.buyer,
                content_addressed,
                Utc.timestamp_opt(1_750_000_000, 0).unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_sets_attestation_ref() {
        let s = setup().await;
        let event = registration("0x1111111111111111111111111111111111111111");
        let result = s.reconciler.apply_registration(&event).await.unwrap();
        assert!(result.is_applied());

        let listing = s.f.store.listing(s.f.listing.id).await.unwrap().unwrap();
        assert_eq!(listing.attestation_ref, Some(event.attestation_uid.clone()));
        assert!(!listing.revoked);
        assert_eq!(
            s.notifier.notices.lock().as_slice(),
            [format!("attested:ana:{}", event.attestation_uid)]
        );
    }

    #[tokio::test]
    async fn test_registration_redelivery_is_duplicate() {
        let s = setup().await;
        let event = registration("0x1111111111111111111111111111111111111111");
        s.reconciler.apply_registration(&event).await.unwrap();
        let again = s.reconciler.apply_registration(&event).await.unwrap();
        assert_eq!(again.status, ReconcileStatus::Duplicate);
        assert_eq!(s.notifier.notices.lock().len(), 1);
        assert_eq!(s.reconciler.cache_stats().hits, 1);

        // A fresh reconciler (empty cache) still refuses to re-apply.
        let config = LinkConfig::default();
        let cold = Reconciler::new(
            s.f.store.clone(),
            Arc::new(LinkIssuer::new(s.f.store.clone(), &config)),
            Arc::new(LogNotifier),
            &config,
        );
        let cold_result = cold.apply_registration(&event).await.unwrap();
        assert_eq!(cold_result.status, ReconcileStatus::Duplicate);
    }

    #[tokio::test]
    async fn test_registration_owner_mismatch_rejected() {
        let s = setup().await;
        let event = registration("0x9999999999999999999999999999999999999999");
        let result = s.reconciler.apply_registration(&event).await.unwrap();
        assert_eq!(result.status, ReconcileStatus::Rejected);
        let listing = s.f.store.listing(s.f.listing.id).await.unwrap().unwrap();
        assert!(listing.attestation_ref.is_none());
    }

    #[tokio::test]
    async fn test_registration_for_unknown_fingerprint_rejected() {
        let s = setup().await;
        let mut event = registration("0x1111111111111111111111111111111111111111");
        event.content_fingerprint = "ff".repeat(32);
        let result = s.reconciler.apply_registration(&event).await.unwrap();
        assert_eq!(result.status, ReconcileStatus::Rejected);
    }

    #[tokio::test]
    async fn test_revocation_applies_once() {
        let s = setup().await;
        let event = registration("0x1111111111111111111111111111111111111111");
        s.reconciler.apply_registration(&event).await.unwrap();

        let revocation = RevocationConfirmed {
            attestation_uid: event.attestation_uid.to_uppercase().replace("0X", "0x"),
            owner_address: "0x1111111111111111111111111111111111111111".to_string(),
        };
        assert!(s.reconciler.apply_revocation(&revocation).await.unwrap().is_applied());
        assert_eq!(
            s.reconciler.apply_revocation(&revocation).await.unwrap().status,
            ReconcileStatus::Duplicate
        );
        assert!(s.f.store.listing(s.f.listing.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_revocation_by_non_owner_rejected() {
        let s = setup().await;
        let event = registration("0x1111111111111111111111111111111111111111");
        s.reconciler.apply_registration(&event).await.unwrap();
        let revocation = RevocationConfirmed {
            attestation_uid: event.attestation_uid.clone(),
            owner_address: s.f.buyer.wallet_address.clone(),
        };
        assert_eq!(
            s.reconciler.apply_revocation(&revocation).await.unwrap().status,
            ReconcileStatus::Rejected
        );
        assert!(!s.f.store.listing(s.f.listing.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_purchase_records_transaction_and_grants_link() {
        let s = setup().await;
        let artifact = artifact(&s, false).await;
        let event = purchase(&s.f.buyer, &artifact);

        let result = s.reconciler.apply_purchase(&event).await.unwrap();
        assert!(result.is_applied());
        let link = result.link.unwrap();
        assert_eq!(link.max_downloads, Some(1));
        let hours = (link.expires_at.unwrap() - Utc::now()).num_hours();
        assert!((47..=48).contains(&hours), "post-purchase grant is 48h, got {hours}");

        let tx = s
            .f
            .store
            .transaction_by_attestation(&event.attestation_uid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.artifact_id, artifact.id);
        assert_eq!(tx.block_number, 6_120_345);
        assert_eq!(tx.fee_paid.as_deref(), Some("210000000000000"));
        assert_eq!(
            s.notifier.notices.lock().as_slice(),
            ["purchased:ben".to_string(), "link:ben:conventional".to_string()]
        );
    }

    #[tokio::test]
    async fn test_purchase_redelivery_creates_no_second_transaction() {
        let s = setup().await;
        let artifact = artifact(&s, true).await;
        let event = purchase(&s.f.buyer, &artifact);

        let (first, second) = tokio::join!(
            s.reconciler.apply_purchase(&event),
            s.reconciler.apply_purchase(&event)
        );
        let mut statuses = [first.unwrap().status, second.unwrap().status];
        statuses.sort_by_key(|s| *s as u8);
        assert_eq!(statuses, [ReconcileStatus::Applied, ReconcileStatus::Duplicate]);

        let third = s.reconciler.apply_purchase(&event).await.unwrap();
        assert_eq!(third.status, ReconcileStatus::Duplicate);
        assert_eq!(
            s.notifier
                .notices
                .lock()
                .iter()
                .filter(|n| n.starts_with("purchased"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_purchase_without_artifact_rejected() {
        let s = setup().await;
        let artifact = artifact(&s, false).await;
        let mut event = purchase(&s.f.buyer, &artifact);
        event.content_fingerprint = "ff".repeat(32);

        let result = s.reconciler.apply_purchase(&event).await.unwrap();
        assert_eq!(result.status, ReconcileStatus::Rejected);
        assert!(s
            .f
            .store
            .transaction_by_attestation(&event.attestation_uid)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reused_tx_hash_under_new_uid_rejected() {
        let s = setup().await;
        let artifact = artifact(&s, false).await;
        let event = purchase(&s.f.buyer, &artifact);
        s.reconciler.apply_purchase(&event).await.unwrap();

        let forged = PurchaseConfirmed {
            attestation_uid: format!("0x{}", "0f".repeat(32)),
            ..event
        };
        let result = s.reconciler.apply_purchase(&forged).await.unwrap();
        assert_eq!(result.status, ReconcileStatus::Rejected);
    }

    #[tokio::test]
    async fn test_content_addressed_purchase_gets_gateway_link() {
        let s = setup().await;
        let artifact = artifact(&s, true).await;
        let result = s
            .reconciler
            .apply_purchase(&purchase(&s.f.buyer, &artifact))
            .await
            .unwrap();
        let link = result.link.unwrap();
        assert_eq!(link.medium, StorageMedium::ContentAddressed);
        assert!(link.expires_at.is_none());
        assert!(link.url.ends_with(&artifact.locator));
    }
}
