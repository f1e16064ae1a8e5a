//! Read access to attestation state on the ledger.

use crate::error::{Error, Result};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;
use tracing::debug;

sol! {
    #[sol(rpc)]
    interface IEAS {
        struct Attestation {
            bytes32 uid;
            bytes32 schema;
            uint64 time;
            uint64 expirationTime;
            uint64 revocationTime;
            bytes32 refUID;
            address recipient;
            address attester;
            bool revocable;
            bytes data;
        }

        function getAttestation(bytes32 uid) external view returns (Attestation memory);
        function getNonce(address account) external view returns (uint256);
    }
}

/// Ledger view of one attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainAttestation {
    /// Attestation uid.
    pub uid: B256,
    /// Schema the attestation was made under.
    pub schema: B256,
    /// Whether the attestation may be revoked.
    pub revocable: bool,
    /// Whether a revocation has been recorded.
    pub revoked: bool,
}

/// Ledger queries needed before signing.
#[async_trait]
pub trait AttestationLedger: Send + Sync {
    /// Fetch an attestation; `None` if no attestation exists under `uid`.
    async fn attestation(&self, uid: B256) -> Result<Option<OnChainAttestation>>;

    /// Current delegated-signature nonce of `account`.
    async fn nonce(&self, account: Address) -> Result<U256>;
}

/// [`AttestationLedger`] backed by the attestation service contract.
pub struct EasLedger {
    contract: IEAS::IEASInstance<DynProvider>,
}

impl EasLedger {
    /// Connect to the contract at `eas_address` through `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns `Ledger` if the RPC endpoint is unreachable.
    pub async fn connect(rpc_url: &str, eas_address: Address) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .map_err(|e| Error::Ledger(format!("cannot connect to {rpc_url}: {e}")))?
            .erased();
        Ok(Self::with_provider(provider, eas_address))
    }

    /// Use an existing provider.
    #[must_use]
    pub fn with_provider(provider: DynProvider, eas_address: Address) -> Self {
        Self {
            contract: IEAS::new(eas_address, provider),
        }
    }
}

#[async_trait]
impl AttestationLedger for EasLedger {
    async fn attestation(&self, uid: B256) -> Result<Option<OnChainAttestation>> {
        let attestation = self
            .contract
            .getAttestation(uid)
            .call()
            .await
            .map_err(|e| Error::Ledger(format!("getAttestation({uid}) failed: {e}")))?;

        // The contract returns an all-zero record for unknown uids.
        if attestation.uid == B256::ZERO {
            debug!("Attestation {uid} not found on ledger");
            return Ok(None);
        }
        Ok(Some(OnChainAttestation {
            uid: attestation.uid,
            schema: attestation.schema,
            revocable: attestation.revocable,
            revoked: attestation.revocationTime != 0,
        }))
    }

    async fn nonce(&self, account: Address) -> Result<U256> {
        self.contract
            .getNonce(account)
            .call()
            .await
            .map_err(|e| Error::Ledger(format!("getNonce({account}) failed: {e}")))
    }
}
