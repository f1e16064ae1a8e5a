//! The service's custody key.

use crate::config::Secret;
use crate::error::{Error, Result};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use std::str::FromStr;

/// Signs EIP-712 digests on behalf of the service.
#[async_trait]
pub trait CustodySigner: Send + Sync {
    /// Address corresponding to the custody key.
    fn address(&self) -> Address;

    /// Sign a 32-byte digest.
    async fn sign_digest(&self, digest: B256) -> Result<Signature>;
}

/// Custody key held in process memory.
#[derive(Clone)]
pub struct LocalCustodyKey {
    signer: PrivateKeySigner,
}

impl LocalCustodyKey {
    /// Load the key from its hex form.
    ///
    /// # Errors
    ///
    /// Returns `Signing` if the secret is unset or not a valid secp256k1 key.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Signing("custody key is not configured".to_string()));
        }
        let signer = PrivateKeySigner::from_str(secret.expose().trim())
            .map_err(|e| Error::Signing(format!("invalid custody key: {e}")))?;
        Ok(Self { signer })
    }

    /// Generate a fresh random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Hex encoding of the private key, `0x`-prefixed.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signer.to_bytes()))
    }
}

impl std::fmt::Debug for LocalCustodyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCustodyKey")
            .field("address", &self.signer.address())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CustodySigner for LocalCustodyKey {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_digest(&self, digest: B256) -> Result<Signature> {
        self.signer
            .sign_hash(&digest)
            .await
            .map_err(|e| Error::Signing(e.to_string()))
    }
}
