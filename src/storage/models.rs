//! Persistent entities.
//!
//! Addresses are stored lower-cased with their `0x` prefix; content
//! fingerprints are stored as lower-case hex without prefix. Timestamps are
//! unix seconds in the database and [`DateTime<Utc>`] in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Where a file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMedium {
    /// Mutable-path object storage.
    Conventional,
    /// Content-addressed storage served through a public gateway.
    ContentAddressed,
}

impl StorageMedium {
    /// Medium for a `deliver_as_content_addressed` flag.
    #[must_use]
    pub fn from_flag(content_addressed: bool) -> Self {
        if content_addressed {
            Self::ContentAddressed
        } else {
            Self::Conventional
        }
    }

    /// Whether this is the content-addressed medium.
    #[must_use]
    pub fn is_content_addressed(self) -> bool {
        matches!(self, Self::ContentAddressed)
    }

    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conventional => "conventional",
            Self::ContentAddressed => "content-addressed",
        }
    }
}

impl fmt::Display for StorageMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMedium {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conventional" => Ok(Self::Conventional),
            "content-addressed" => Ok(Self::ContentAddressed),
            other => Err(crate::Error::Storage(format!(
                "unknown storage medium: {other}"
            ))),
        }
    }
}

/// A marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: Uuid,
    /// Display name.
    pub username: String,
    /// Contact address for notifications.
    pub email: String,
    /// Lower-cased wallet address.
    pub wallet_address: String,
    /// The user's own registration attestation, if any.
    pub attestation_ref: Option<String>,
}

/// Fields required to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Wallet address (any case).
    pub wallet_address: String,
    /// Registration attestation, if already issued.
    pub attestation_ref: Option<String>,
}

/// A photo offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing id.
    pub id: Uuid,
    /// Owning user.
    pub owner_id: Uuid,
    /// Title shown to buyers.
    pub title: String,
    /// Original upload filename.
    pub original_name: String,
    /// MIME type of the original.
    pub mime_type: String,
    /// SHA-256 of the original, lower-case hex.
    pub content_fingerprint: String,
    /// Where the original lives.
    pub medium: StorageMedium,
    /// Storage locator of the original.
    pub locator: String,
    /// Price as a decimal ether string.
    pub price: String,
    /// Registration attestation uid once confirmed on-chain.
    pub attestation_ref: Option<String>,
    /// Set once a revocation is confirmed on-chain.
    pub revoked: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Whether the registration attestation has been confirmed.
    #[must_use]
    pub fn is_attested(&self) -> bool {
        self.attestation_ref.is_some()
    }
}

/// Fields required to create a listing.
#[derive(Debug, Clone)]
pub struct NewListing {
    /// Owning user.
    pub owner_id: Uuid,
    /// Title.
    pub title: String,
    /// Original filename.
    pub original_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Content fingerprint (with or without `0x`).
    pub content_fingerprint: String,
    /// Storage medium of the original.
    pub medium: StorageMedium,
    /// Storage locator.
    pub locator: String,
    /// Decimal ether price.
    pub price: String,
}

/// A purchase-specific file derived from a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Artifact id.
    pub id: Uuid,
    /// Listing the artifact was derived from.
    pub listing_id: Uuid,
    /// Filename offered on download.
    pub original_name: String,
    /// MIME type.
    pub mime_type: String,
    /// SHA-256 of the stamped bytes, lower-case hex.
    pub content_fingerprint: String,
    /// Storage medium.
    pub medium: StorageMedium,
    /// Storage locator (object path or content id).
    pub locator: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields required to record an artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// Source listing.
    pub listing_id: Uuid,
    /// Filename.
    pub original_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Fingerprint of the stored bytes.
    pub content_fingerprint: String,
    /// Storage medium.
    pub medium: StorageMedium,
    /// Storage locator.
    pub locator: String,
}

/// A confirmed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction record id.
    pub id: Uuid,
    /// Buyer.
    pub buyer_id: Uuid,
    /// Artifact delivered to the buyer.
    pub artifact_id: Uuid,
    /// Purchase attestation uid.
    pub attestation_ref: String,
    /// Ledger transaction hash.
    pub tx_hash: String,
    /// Block hash the transaction was mined in.
    pub block_hash: String,
    /// Block number.
    pub block_number: u64,
    /// Fee paid, in wei, when known.
    pub fee_paid: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields required to record a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Buyer.
    pub buyer_id: Uuid,
    /// Artifact.
    pub artifact_id: Uuid,
    /// Purchase attestation uid.
    pub attestation_ref: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block hash.
    pub block_hash: String,
    /// Block number.
    pub block_number: u64,
    /// Fee paid in wei.
    pub fee_paid: Option<String>,
}

/// A consumable download link bound to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Link id.
    pub id: Uuid,
    /// Artifact served by the link.
    pub artifact_id: Uuid,
    /// Buyer the link was issued to.
    pub buyer_id: Uuid,
    /// Medium of the artifact.
    pub medium: StorageMedium,
    /// Opaque token (content id for content-addressed links).
    pub token: String,
    /// URL handed to the buyer.
    pub url: String,
    /// Expiry; always `None` for content-addressed links.
    pub expires_at: Option<DateTime<Utc>>,
    /// Completed consumptions.
    pub download_count: u32,
    /// Consumption ceiling; always `None` for content-addressed links.
    pub max_downloads: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl DownloadLink {
    /// Whether the ceiling has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_downloads
            .is_some_and(|max| self.download_count >= max)
    }

    /// Whether the link is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the link can still be handed out at `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.is_exhausted() && !self.is_expired(now)
    }
}

/// Fields required to create a link.
#[derive(Debug, Clone)]
pub struct NewLink {
    /// Artifact.
    pub artifact_id: Uuid,
    /// Buyer.
    pub buyer_id: Uuid,
    /// Medium.
    pub medium: StorageMedium,
    /// Token.
    pub token: String,
    /// URL.
    pub url: String,
    /// Expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Ceiling.
    pub max_downloads: Option<u32>,
}

/// Lower-case an address, keeping its `0x` prefix.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Lower-case a fingerprint and strip any `0x` prefix.
#[must_use]
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    let trimmed = fingerprint.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}
