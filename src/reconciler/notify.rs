//! User notifications.

use crate::error::Result;
use crate::storage::{DownloadLink, Listing, Transaction, User};
use async_trait::async_trait;
use tracing::info;

/// Delivers reconciliation notices to users.
///
/// Message formatting and transport belong to the implementation; a failed
/// notification never undoes the state change that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The owner's listing registration was confirmed.
    async fn listing_attested(&self, owner: &User, listing: &Listing, uid: &str) -> Result<()>;

    /// The buyer's purchase was recorded.
    async fn purchase_confirmed(
        &self,
        buyer: &User,
        listing: &Listing,
        transaction: &Transaction,
    ) -> Result<()>;

    /// The buyer's download is available at `link`.
    async fn download_ready(&self, buyer: &User, listing: &Listing, link: &DownloadLink)
        -> Result<()>;
}

/// [`Notifier`] that writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn listing_attested(&self, owner: &User, listing: &Listing, uid: &str) -> Result<()> {
        info!(
            to = %owner.email,
            "Listing \"{}\" registered on the ledger as {uid}",
            listing.title
        );
        Ok(())
    }

    async fn purchase_confirmed(
        &self,
        buyer: &User,
        listing: &Listing,
        transaction: &Transaction,
    ) -> Result<()> {
        info!(
            to = %buyer.email,
            "Purchase of \"{}\" confirmed (attestation {}, transaction {})",
            listing.title,
            transaction.attestation_ref,
            transaction.id
        );
        Ok(())
    }

    async fn download_ready(
        &self,
        buyer: &User,
        listing: &Listing,
        link: &DownloadLink,
    ) -> Result<()> {
        match (link.expires_at, link.max_downloads) {
            (Some(expires_at), Some(max)) => info!(
                to = %buyer.email,
                "Download of \"{}\" ready at {} ({max} downloads, expires {expires_at})",
                listing.title,
                link.url
            ),
            _ => info!(
                to = %buyer.email,
                "Download of \"{}\" ready at {}",
                listing.title,
                link.url
            ),
        }
        Ok(())
    }
}
