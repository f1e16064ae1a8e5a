//! Conversion of resolver logs into relay payloads.

use super::transport::{LedgerLog, PhotoPurchased, PhotoRegistered, PhotoRemovedFromSale, ReceiptSummary};
use crate::confirmed::{ConfirmedEvent, PurchaseConfirmed, RegistrationConfirmed, RevocationConfirmed};
use crate::storage::normalize_address;
use alloy::primitives::{Address, B256};

/// Flatten a decoded log into its relay payload; `None` for unrecognized logs.
#[must_use]
pub fn normalize(log: LedgerLog) -> Option<ConfirmedEvent> {
    match log {
        LedgerLog::Registered(event) => Some(ConfirmedEvent::Registration(registration(&event))),
        LedgerLog::RemovedFromSale(event) => Some(ConfirmedEvent::Revocation(revocation(&event))),
        LedgerLog::Purchased { event, receipt } => {
            Some(ConfirmedEvent::Purchase(purchase(&event, &receipt)))
        }
        LedgerLog::Unrecognized { .. } => None,
    }
}

fn registration(event: &PhotoRegistered) -> RegistrationConfirmed {
    RegistrationConfirmed {
        attestation_uid: uid(event.attestationUid),
        owner_address: address(event.photographer),
        content_fingerprint: fingerprint(event.contentHash),
    }
}

fn revocation(event: &PhotoRemovedFromSale) -> RevocationConfirmed {
    RevocationConfirmed {
        attestation_uid: uid(event.attestationUid),
        owner_address: address(event.photographer),
    }
}

fn purchase(event: &PhotoPurchased, receipt: &ReceiptSummary) -> PurchaseConfirmed {
    PurchaseConfirmed {
        attestation_uid: uid(event.purchaseAttUID),
        buyer_address: address(event.buyer),
        listing_attestation_uid: uid(event.photoRefUID),
        artifact_id_hash: uid(event.resourceIdHash),
        content_fingerprint: fingerprint(event.contentHash),
        content_addressed: event.isIpfs,
        tx_hash: uid(receipt.tx_hash),
        block_hash: uid(receipt.block_hash),
        block_number: receipt.block_number.to_string(),
        fee_paid: receipt.fee_paid.map(|fee| fee.to_string()),
    }
}

fn address(address: Address) -> String {
    normalize_address(&address.to_string())
}

fn uid(value: B256) -> String {
    format!("0x{}", hex::encode(value))
}

fn fingerprint(value: B256) -> String {
    hex::encode(value)
}
