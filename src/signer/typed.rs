//! EIP-712 messages accepted by the attestation service's delegated entry points.

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::Eip712Domain;
use std::borrow::Cow;

sol! {
    /// Delegated attestation request.
    #[derive(Debug, PartialEq, Eq)]
    struct Attest {
        address attester;
        bytes32 schema;
        address recipient;
        uint64 expirationTime;
        bool revocable;
        bytes32 refUID;
        bytes data;
        uint256 value;
        uint256 nonce;
        uint64 deadline;
    }

    /// Delegated revocation request.
    #[derive(Debug, PartialEq, Eq)]
    struct Revoke {
        address revoker;
        bytes32 schema;
        bytes32 uid;
        uint256 value;
        uint256 nonce;
        uint64 deadline;
    }
}

/// Attestations issued here never expire.
pub const NO_EXPIRATION: u64 = 0;

/// Signing domain of the attestation service deployed at `contract`.
#[must_use]
pub fn eas_domain(version: &str, chain_id: u64, contract: Address) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Borrowed("EAS")),
        Some(Cow::Owned(version.to_string())),
        Some(U256::from(chain_id)),
        Some(contract),
        None,
    )
}
