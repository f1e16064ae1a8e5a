//! Request flows that produce signed bundles for end users.
//!
//! Each flow checks marketplace state, then hands a request to the
//! [`DelegatedSigner`]. Refusals are reported as failed [`Outcome`]s.
//! Buyers of a confirmed purchase can also ask for a fresh download link.

use crate::artifact::{artifact_id_hash, ArtifactIssuer, LinkIssuer, LinkOptions};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::signer::{
    AuthorizationBundle, DelegatedSigner, ListingRegistration, PurchaseAttestation,
    RevocationBundle,
};
use crate::storage::{normalize_address, DownloadLink, GeneratedArtifact, MarketStore};
use alloy::primitives::B256;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A listing owner asks to register the listing on the ledger.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Listing to register.
    pub listing_id: Uuid,
    /// Wallet currently connected in the client.
    pub current_wallet: String,
}

/// A buyer asks to purchase a listing.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Listing to purchase.
    pub listing_id: Uuid,
    /// Wallet currently connected in the client.
    pub current_wallet: String,
    /// Deliver the copy through content-addressed storage.
    pub content_addressed: bool,
}

/// An owner asks to withdraw a registered listing.
#[derive(Debug, Clone)]
pub struct RevocationRequest {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Registration attestation to revoke.
    pub attestation_uid: String,
    /// Wallet currently connected in the client.
    pub current_wallet: String,
}

/// A buyer asks for a link to the copy of a confirmed purchase.
#[derive(Debug, Clone)]
pub struct DownloadLinkRequest {
    /// Authenticated user.
    pub user_id: Uuid,
    /// Confirmed purchase.
    pub transaction_id: Uuid,
}

/// Signed purchase request plus the artifact it commits to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseAuthorization {
    /// Buyer-stamped copy generated for this purchase.
    pub artifact: GeneratedArtifact,
    /// Identifier hash recorded in the attestation.
    pub artifact_id_hash: B256,
    /// Bundle the buyer submits; its value is the listing price.
    pub bundle: AuthorizationBundle,
}

/// Orchestrates registration, purchase, revocation and link requests.
pub struct MarketService {
    store: Arc<dyn MarketStore>,
    signer: Arc<DelegatedSigner>,
    artifacts: Arc<ArtifactIssuer>,
    links: Arc<LinkIssuer>,
    on_demand: LinkOptions,
}

impl MarketService {
    /// Create the service. Links requested on demand use the standard
    /// validity of `link_config`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketStore>,
        signer: Arc<DelegatedSigner>,
        artifacts: Arc<ArtifactIssuer>,
        links: Arc<LinkIssuer>,
        link_config: &LinkConfig,
    ) -> Self {
        Self {
            store,
            signer,
            artifacts,
            links,
            on_demand: LinkOptions::standard(link_config),
        }
    }

    /// Sign the registration of a listing for its owner.
    ///
    /// The bundle references the owner's own attestation, or zero.
    ///
    /// # Errors
    ///
    /// Returns an error on storage, ledger or signing failure.
    pub async fn request_registration(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Outcome<AuthorizationBundle>> {
        let Some(user) = self.store.user(request.user_id).await? else {
            return Ok(Outcome::failure("User does not exist"));
        };
        let Some(listing) = self.store.listing(request.listing_id).await? else {
            return Ok(Outcome::failure(format!(
                "Listing {} does not exist",
                request.listing_id
            )));
        };
        if normalize_address(&request.current_wallet) != user.wallet_address {
            return Ok(Outcome::failure(
                "Connected wallet does not match the account wallet",
            ));
        }
        if listing.owner_id != user.id {
            return Ok(Outcome::failure(format!(
                "Only the owner can register listing {}",
                listing.id
            )));
        }
        if listing.is_attested() {
            return Ok(Outcome::failure(format!(
                "Listing {} is already registered",
                listing.id
            )));
        }

        let referenced_uid = user
            .attestation_ref
            .clone()
            .unwrap_or_else(|| B256::ZERO.to_string());
        self.signer
            .sign_listing_registration(&ListingRegistration {
                owner_address: user.wallet_address.clone(),
                listing_id: listing.id.to_string(),
                content_fingerprint: listing.content_fingerprint.clone(),
                content_addressed: listing.medium.is_content_addressed(),
                price: listing.price.clone(),
                referenced_uid,
            })
            .await
    }

    /// Generate the buyer's artifact and sign the purchase attestation.
    ///
    /// The artifact is persisted before the purchase is confirmed on the
    /// ledger; the confirmed event is matched back to it by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error on storage, ledger or signing failure.
    pub async fn request_purchase(
        &self,
        request: &PurchaseRequest,
    ) -> Result<Outcome<PurchaseAuthorization>> {
        let Some(buyer) = self.store.user(request.user_id).await? else {
            return Ok(Outcome::failure("User does not exist"));
        };
        let Some(listing) = self.store.listing(request.listing_id).await? else {
            return Ok(Outcome::failure(format!(
                "Listing {} does not exist",
                request.listing_id
            )));
        };
        if normalize_address(&request.current_wallet) != buyer.wallet_address {
            return Ok(Outcome::failure(
                "Connected wallet does not match the account wallet",
            ));
        }
        if listing.revoked {
            return Ok(Outcome::failure(format!(
                "Listing {} is no longer for sale",
                listing.id
            )));
        }
        let Some(listing_uid) = listing.attestation_ref.clone() else {
            return Ok(Outcome::failure(format!(
                "Listing {} is not registered on the ledger",
                listing.id
            )));
        };

        let artifact = match self
            .artifacts
            .generate_purchase_artifact(&listing, &buyer, request.content_addressed, Utc::now())
            .await
        {
            Ok(artifact) => artifact,
            Err(Error::Conflict(reason)) => {
                warn!("Purchase of {} refused: {reason}", listing.id);
                return Ok(Outcome::failure(
                    "An identical purchase copy already exists; retry the purchase",
                ));
            }
            Err(e) => return Err(e),
        };
        let id_hash = artifact_id_hash(&artifact);

        let outcome = self
            .signer
            .sign_purchase_attestation(&PurchaseAttestation {
                buyer_address: buyer.wallet_address.clone(),
                artifact_id_hash: id_hash.to_string(),
                content_fingerprint: artifact.content_fingerprint.clone(),
                content_addressed: request.content_addressed,
                price: listing.price.clone(),
                referenced_uid: listing_uid,
                aux_data: String::new(),
            })
            .await?;

        if outcome.is_success() {
            info!(
                "Purchase of {} by {} authorized (artifact {})",
                listing.id, buyer.id, artifact.id
            );
        } else {
            warn!(
                artifact = %artifact.id,
                "Purchase of {} not signed, artifact left unconfirmed: {}",
                listing.id,
                outcome.message()
            );
        }
        Ok(outcome.map(|bundle| PurchaseAuthorization {
            artifact,
            artifact_id_hash: id_hash,
            bundle,
        }))
    }

    /// Sign the revocation of a listing's registration for its owner.
    ///
    /// # Errors
    ///
    /// Returns an error on storage, ledger or signing failure.
    pub async fn request_revocation(
        &self,
        request: &RevocationRequest,
    ) -> Result<Outcome<RevocationBundle>> {
        let Some(user) = self.store.user(request.user_id).await? else {
            return Ok(Outcome::failure("User does not exist"));
        };
        if normalize_address(&request.current_wallet) != user.wallet_address {
            return Ok(Outcome::failure(
                "Connected wallet does not match the account wallet",
            ));
        }
        let Some(listing) = self
            .store
            .listing_by_attestation(&request.attestation_uid)
            .await?
        else {
            return Ok(Outcome::failure(format!(
                "No listing is registered as {}",
                request.attestation_uid
            )));
        };
        if listing.owner_id != user.id {
            return Ok(Outcome::failure(format!(
                "Only the owner can withdraw listing {}",
                listing.id
            )));
        }

        let Some(uid) = listing.attestation_ref.as_deref() else {
            return Ok(Outcome::failure(format!(
                "Listing {} is not registered on the ledger",
                listing.id
            )));
        };
        self.signer
            .sign_revocation(uid, self.signer.listing_schema())
            .await
    }

    /// Return the buyer's usable link to a purchased copy, or issue a new one.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn request_download_link(
        &self,
        request: &DownloadLinkRequest,
    ) -> Result<Outcome<DownloadLink>> {
        let Some(user) = self.store.user(request.user_id).await? else {
            return Ok(Outcome::failure("User does not exist"));
        };
        let Some(transaction) = self.store.transaction(request.transaction_id).await? else {
            return Ok(Outcome::failure(format!(
                "Transaction {} does not exist",
                request.transaction_id
            )));
        };
        if transaction.buyer_id != user.id {
            return Ok(Outcome::failure(format!(
                "Only the buyer can request a link for transaction {}",
                transaction.id
            )));
        }

        if let Some(link) = self.links.existing_link(transaction.artifact_id).await? {
            return Ok(Outcome::success("Download link is still valid", link));
        }
        let link = self
            .links
            .issue_or_reuse_download_link(transaction.artifact_id, user.id, self.on_demand)
            .await?;
        info!(
            "Issued download link for transaction {} to {}",
            transaction.id, user.id
        );
        Ok(Outcome::success("Download link generated", link))
    }
}
