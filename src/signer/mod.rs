//! Delegated signing of attestation and revocation requests.
//!
//! The service signs EIP-712 `Attest`/`Revoke` messages with its custody key;
//! the end user's wallet later submits the signed request on-chain and pays
//! for it.
//!
//! ```text
//! request ──► validate ──fail──► Outcome::failure (no ledger, no key)
//!                │
//!               ok
//!                ▼
//!        schema lookup + encode
//!                │
//!                ▼
//!     nonce (ledger) + deadline
//!                │
//!                ▼
//!      EIP-712 digest ──► custody key ──► AuthorizationBundle
//! ```

mod custody;
mod delegated;
mod ledger;
mod typed;

pub use custody::{CustodySigner, LocalCustodyKey};
pub use delegated::{
    AuthorizationBundle, Clock, DelegatedSignature, DelegatedSigner, ListingRegistration,
    PurchaseAttestation, RevocationBundle, MAX_AUX_DATA_LEN,
};
pub use ledger::{AttestationLedger, EasLedger, OnChainAttestation};
pub use typed::{eas_domain, Attest, Revoke, NO_EXPIRATION};
