//! Normalized confirmed-event payloads relayed from the listener to the
//! reconciler.
//!
//! Addresses are lower-cased and `0x`-prefixed, content fingerprints are
//! lower-case hex without prefix, and numeric fields travel as decimal
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A listing registration attestation was mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfirmed {
    /// Uid of the registration attestation.
    pub attestation_uid: String,
    /// Wallet the attestation names as owner.
    pub owner_address: String,
    /// Fingerprint of the registered file.
    pub content_fingerprint: String,
}

/// A listing's registration attestation was revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationConfirmed {
    /// Uid of the revoked registration attestation.
    pub attestation_uid: String,
    /// Wallet the event names as owner.
    pub owner_address: String,
}

/// A purchase attestation was mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseConfirmed {
    /// Uid of the purchase attestation.
    pub attestation_uid: String,
    /// Buyer's wallet.
    pub buyer_address: String,
    /// Registration attestation of the purchased listing.
    pub listing_attestation_uid: String,
    /// Artifact id hash committed to in the attestation.
    pub artifact_id_hash: String,
    /// Fingerprint of the generated artifact.
    pub content_fingerprint: String,
    /// Whether the artifact lives in content-addressed storage.
    pub content_addressed: bool,
    /// Ledger transaction hash.
    pub tx_hash: String,
    /// Block hash.
    pub block_hash: String,
    /// Block number, decimal.
    pub block_number: String,
    /// Fee paid in wei, decimal, when the receipt was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_paid: Option<String>,
}

/// Kind of a confirmed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Listing registration.
    Registration,
    /// Listing revocation.
    Revocation,
    /// Purchase.
    Purchase,
}

impl EventKind {
    /// Relay endpoint path for this kind.
    #[must_use]
    pub fn relay_path(self) -> &'static str {
        match self {
            Self::Registration => "/internal/ledger/registration-confirmed",
            Self::Revocation => "/internal/ledger/revocation-confirmed",
            Self::Purchase => "/internal/ledger/purchase-confirmed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registration => "registration",
            Self::Revocation => "revocation",
            Self::Purchase => "purchase",
        })
    }
}

/// Any confirmed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmedEvent {
    /// Listing registration.
    Registration(RegistrationConfirmed),
    /// Listing revocation.
    Revocation(RevocationConfirmed),
    /// Purchase.
    Purchase(PurchaseConfirmed),
}

impl ConfirmedEvent {
    /// Kind of the event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Registration(_) => EventKind::Registration,
            Self::Revocation(_) => EventKind::Revocation,
            Self::Purchase(_) => EventKind::Purchase,
        }
    }

    /// The attestation uid the event is about.
    #[must_use]
    pub fn attestation_uid(&self) -> &str {
        match self {
            Self::Registration(e) => &e.attestation_uid,
            Self::Revocation(e) => &e.attestation_uid,
            Self::Purchase(e) => &e.attestation_uid,
        }
    }

    /// Key identifying the logical event; a re-delivery yields the same key.
    #[must_use]
    pub fn idempotency_key(&self) -> EventKey {
        EventKey::new(self.kind(), self.attestation_uid())
    }

    /// JSON body sent over the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Registration(e) => serde_json::to_value(e),
            Self::Revocation(e) => serde_json::to_value(e),
            Self::Purchase(e) => serde_json::to_value(e),
        }
    }
}

/// Idempotency key of a confirmed event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    kind: EventKind,
    uid: String,
}

impl EventKey {
    /// Key for `kind` about attestation `uid` (any case).
    #[must_use]
    pub fn new(kind: EventKind, uid: &str) -> Self {
        Self {
            kind,
            uid: uid.to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.uid)
    }
}
