//! Purchase artifacts and their download links.
//!
//! A purchase produces one buyer-stamped PNG ([`ArtifactIssuer`]) and, once
//! the purchase is confirmed on the ledger, a consumable link to it
//! ([`LinkIssuer`]).

pub(crate) mod issuer;
mod links;
pub mod png;

pub use issuer::{
    artifact_id_hash, ArtifactIssuer, ImageTranscoder, Transcoder, BUYER_WALLET_KEY,
    PURCHASE_TIMESTAMP_KEY,
};
pub use links::{LinkIssuer, LinkOptions};
