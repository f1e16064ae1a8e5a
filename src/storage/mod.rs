//! Persistence for listings, users, artifacts, transactions and links.
//!
//! [`MarketStore`] is the seam the reconciler and issuers depend on;
//! [`SqliteStore`] is the production implementation. Raw file bytes live in
//! a [`BlobStore`] (conventional) or a [`ContentStore`] (content-addressed).

mod blob;
mod models;
mod sqlite;

pub use blob::{BlobStore, BlobStream, ContentStore, FsBlobStore, FsContentStore};
pub use models::{
    normalize_address, normalize_fingerprint, DownloadLink, GeneratedArtifact, Listing, NewArtifact,
    NewLink, NewListing, NewTransaction, NewUser, StorageMedium, Transaction, User,
};
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistent marketplace state.
///
/// Every mutation that the reconciler relies on for idempotency is a
/// conditional update reporting whether it changed anything.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> Result<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> Result<()>;

    /// Create a user. Fails with `Conflict` if the wallet is already registered.
    async fn create_user(&self, user: &NewUser) -> Result<User>;

    /// Fetch a user by id.
    async fn user(&self, id: Uuid) -> Result<Option<User>>;

    /// Fetch a user by wallet address (any case).
    async fn user_by_address(&self, address: &str) -> Result<Option<User>>;

    /// Create a listing. Fails with `Conflict` on a duplicate fingerprint.
    async fn create_listing(&self, listing: &NewListing) -> Result<Listing>;

    /// Fetch a listing by id.
    async fn listing(&self, id: Uuid) -> Result<Option<Listing>>;

    /// Fetch a listing by content fingerprint.
    async fn listing_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Listing>>;

    /// Fetch a listing by its registration attestation.
    async fn listing_by_attestation(&self, uid: &str) -> Result<Option<Listing>>;

    /// Change the price of a listing that is not yet attested.
    async fn update_listing_price(&self, id: Uuid, price: &str) -> Result<()>;

    /// Delete a listing that is not yet attested.
    async fn delete_listing(&self, id: Uuid) -> Result<()>;

    /// Set the attestation of an unattested listing. Returns false if the
    /// listing already carries an attestation.
    async fn mark_listing_attested(&self, id: Uuid, uid: &str) -> Result<bool>;

    /// Mark the listing carrying `uid` revoked. Returns false if it already was.
    async fn mark_listing_revoked(&self, uid: &str) -> Result<bool>;

    /// Record a generated artifact. Fails with `Conflict` on a duplicate fingerprint.
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<GeneratedArtifact>;

    /// Fetch an artifact by id.
    async fn artifact(&self, id: Uuid) -> Result<Option<GeneratedArtifact>>;

    /// Fetch an artifact by fingerprint.
    async fn artifact_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<GeneratedArtifact>>;

    /// Record a confirmed purchase. Fails with `Conflict` if the attestation
    /// or the transaction hash is already recorded.
    async fn insert_transaction(&self, transaction: &NewTransaction) -> Result<Transaction>;

    /// Fetch a transaction by purchase attestation.
    async fn transaction_by_attestation(&self, uid: &str) -> Result<Option<Transaction>>;

    /// Fetch a transaction by id.
    async fn transaction(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Current link of an artifact, if any.
    async fn link_for_artifact(&self, artifact_id: Uuid) -> Result<Option<DownloadLink>>;

    /// Fetch a link by token.
    async fn link_by_token(&self, token: &str) -> Result<Option<DownloadLink>>;

    /// Create a link. Fails with `Conflict` if the artifact already has one.
    async fn insert_link(&self, link: &NewLink) -> Result<DownloadLink>;

    /// Delete a link. Returns false if it was already gone.
    async fn delete_link(&self, id: Uuid) -> Result<bool>;

    /// Atomically increment the counter of an unexpired, non-exhausted link.
    ///
    /// Returns the updated link, or `None` when the guard rejected the
    /// increment (in which case nothing was written).
    async fn consume_link(&self, token: &str, now: DateTime<Utc>) -> Result<Option<DownloadLink>>;

    /// Delete conventional links whose expiry is at or before `now`.
    async fn prune_expired_links(&self, now: DateTime<Utc>) -> Result<u64>;
}
