//! Delegated attestation and revocation signing.

use super::custody::CustodySigner;
use super::ledger::AttestationLedger;
use super::typed::{eas_domain, Attest, Revoke, NO_EXPIRATION};
use crate::config::{LedgerConfig, SigningConfig};
use crate::error::{Error, Result};
use crate::outcome::Outcome;
use crate::schema::{SchemaItem, SchemaRegistry};
use alloy::dyn_abi::DynSolValue;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{keccak256, Address, Bytes, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest auxiliary payload that fits one NUL-terminated `bytes32` word.
pub const MAX_AUX_DATA_LEN: usize = 31;

/// Source of the current unix time, in seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default())
}

/// Signature in the split form the contract accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelegatedSignature {
    /// Recovery id, 27 or 28.
    pub v: u8,
    /// `r` component.
    pub r: B256,
    /// `s` component.
    pub s: B256,
}

impl From<Signature> for DelegatedSignature {
    fn from(signature: Signature) -> Self {
        Self {
            v: 27 + u8::from(signature.v()),
            r: B256::from(signature.r().to_be_bytes::<32>()),
            s: B256::from(signature.s().to_be_bytes::<32>()),
        }
    }
}

/// Signed attestation request a client submits on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationBundle {
    /// Schema identifier.
    pub schema_uid: B256,
    /// Schema encoding string.
    pub schema: String,
    /// Attestation recipient.
    pub recipient: Address,
    /// ABI-encoded attestation data.
    pub data: Bytes,
    /// Value forwarded with the attestation, in wei.
    pub value: U256,
    /// Referenced attestation, zero if none.
    pub ref_uid: B256,
    /// Signing address; always the service's own.
    pub attester: Address,
    /// Attester nonce the signature commits to.
    pub nonce: U256,
    /// Unix second after which the signature is refused on-chain.
    pub deadline: u64,
    /// Signature over the EIP-712 digest.
    pub signature: DelegatedSignature,
}

/// Signed revocation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationBundle {
    /// Schema identifier.
    pub schema_uid: B256,
    /// Attestation being revoked.
    pub uid: B256,
    /// Revoking address; always the service's own.
    pub revoker: Address,
    /// Revoker nonce the signature commits to.
    pub nonce: U256,
    /// Unix second after which the signature is refused on-chain.
    pub deadline: u64,
    /// Signature over the EIP-712 digest.
    pub signature: DelegatedSignature,
}

/// Input of [`DelegatedSigner::sign_listing_registration`].
#[derive(Debug, Clone)]
pub struct ListingRegistration {
    /// Listing owner's wallet.
    pub owner_address: String,
    /// Listing id; hashed into `fingerprintHash`.
    pub listing_id: String,
    /// SHA-256 of the listed file (with or without `0x`).
    pub content_fingerprint: String,
    /// Whether the file lives in content-addressed storage.
    pub content_addressed: bool,
    /// Decimal ether price.
    pub price: String,
    /// Referenced attestation uid (`0x` + 64 hex digits).
    pub referenced_uid: String,
}

/// Input of [`DelegatedSigner::sign_purchase_attestation`].
#[derive(Debug, Clone)]
pub struct PurchaseAttestation {
    /// Buyer's wallet.
    pub buyer_address: String,
    /// Hash identifying the generated artifact.
    pub artifact_id_hash: String,
    /// SHA-256 of the generated artifact.
    pub content_fingerprint: String,
    /// Whether the artifact lives in content-addressed storage.
    pub content_addressed: bool,
    /// Decimal ether price, forwarded as the attestation value.
    pub price: String,
    /// Referenced attestation uid (the listing's).
    pub referenced_uid: String,
    /// Opaque text of at most [`MAX_AUX_DATA_LEN`] bytes.
    pub aux_data: String,
}

/// Builds and signs delegated attestation/revocation requests with the
/// service's custody key.
pub struct DelegatedSigner {
    registry: Arc<SchemaRegistry>,
    custody: Arc<dyn CustodySigner>,
    ledger: Arc<dyn AttestationLedger>,
    domain: Eip712Domain,
    listing_schema: String,
    purchase_schema: String,
    deadline_window: u64,
    clock: Clock,
}

impl DelegatedSigner {
    /// Create a signer.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the attestation service address is invalid.
    pub fn new(
        ledger_config: &LedgerConfig,
        signing_config: &SigningConfig,
        registry: Arc<SchemaRegistry>,
        custody: Arc<dyn CustodySigner>,
        ledger: Arc<dyn AttestationLedger>,
    ) -> Result<Self> {
        let eas = Address::from_str(&ledger_config.eas_address).map_err(|e| {
            Error::Config(format!(
                "invalid attestation service address {:?}: {e}",
                ledger_config.eas_address
            ))
        })?;
        info!(
            "Delegated signer ready (attester={}, chain_id={}, deadline_window={}s)",
            custody.address(),
            ledger_config.chain_id,
            signing_config.deadline_secs
        );
        Ok(Self {
            registry,
            custody,
            ledger,
            domain: eas_domain(&ledger_config.eas_version, ledger_config.chain_id, eas),
            listing_schema: signing_config.listing_schema.clone(),
            purchase_schema: signing_config.purchase_schema.clone(),
            deadline_window: signing_config.deadline_secs,
            clock: system_clock(),
        })
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The address every bundle is signed by.
    #[must_use]
    pub fn attester(&self) -> Address {
        self.custody.address()
    }

    /// Name of the schema listings are registered under.
    #[must_use]
    pub fn listing_schema(&self) -> &str {
        &self.listing_schema
    }

    /// Deadline for a request issued now.
    #[must_use]
    pub fn make_deadline(&self) -> u64 {
        (self.clock)().saturating_add(self.deadline_window)
    }

    /// Sign the registration attestation of a listing.
    ///
    /// Business-rule failures (malformed owner address, referenced uid or
    /// fingerprint, non-positive price) are returned as a failed [`Outcome`]
    /// without touching the ledger or the custody key.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is missing or malformed, the ledger is
    /// unreachable, or the custody key cannot sign.
    pub async fn sign_listing_registration(
        &self,
        request: &ListingRegistration,
    ) -> Result<Outcome<AuthorizationBundle>> {
        let Some(recipient) = parse_wallet(&request.owner_address) else {
            return Ok(Outcome::failure(format!(
                "Owner address {} is not a valid address",
                request.owner_address
            )));
        };
        let Some(ref_uid) = parse_uid(&request.referenced_uid) else {
            return Ok(Outcome::failure(format!(
                "Referenced attestation uid {} is not valid",
                request.referenced_uid
            )));
        };
        let price = match parse_price(&request.price) {
            Ok(price) => price,
            Err(message) => return Ok(Outcome::failure(message)),
        };
        let Some(content) = parse_fingerprint(&request.content_fingerprint) else {
            return Ok(Outcome::failure(format!(
                "Content fingerprint {} is not a SHA-256 digest",
                request.content_fingerprint
            )));
        };

        let schema = self.registry.lookup(&self.listing_schema)?;
        let data = schema.encoder().encode(&[
            SchemaItem::new(
                "fingerprintHash",
                bytes32(keccak256(request.listing_id.as_bytes())),
            ),
            SchemaItem::new("contentFingerprint", bytes32(content)),
            SchemaItem::new("isContentAddressed", DynSolValue::Bool(request.content_addressed)),
            SchemaItem::new("priceAmount", DynSolValue::Uint(price, 256)),
        ])?;

        // The listing attestation only records the price; nothing is paid.
        let bundle = self
            .sign_attest(schema.uid, &schema.encoding, recipient, data, U256::ZERO, ref_uid)
            .await?;
        info!(
            "Signed listing registration for {} (fingerprint={})",
            request.listing_id,
            hex::encode(content)
        );
        Ok(Outcome::success(
            "Delegated listing attestation signed",
            bundle,
        ))
    }

    /// Sign the purchase attestation of a generated artifact.
    ///
    /// The bundle's value equals the price, so the submitting transaction
    /// carries the payment.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is missing or malformed, the ledger is
    /// unreachable, or the custody key cannot sign.
    pub async fn sign_purchase_attestation(
        &self,
        request: &PurchaseAttestation,
    ) -> Result<Outcome<AuthorizationBundle>> {
        let Some(recipient) = parse_wallet(&request.buyer_address) else {
            return Ok(Outcome::failure(format!(
                "Buyer address {} is not a valid address",
                request.buyer_address
            )));
        };
        let Some(ref_uid) = parse_uid(&request.referenced_uid) else {
            return Ok(Outcome::failure(format!(
                "Referenced attestation uid {} is not valid",
                request.referenced_uid
            )));
        };
        let price = match parse_price(&request.price) {
            Ok(price) => price,
            Err(message) => return Ok(Outcome::failure(message)),
        };
        if request.aux_data.len() > MAX_AUX_DATA_LEN {
            return Ok(Outcome::failure(format!(
                "Auxiliary data must be at most {MAX_AUX_DATA_LEN} bytes, got {}",
                request.aux_data.len()
            )));
        }
        let Some(artifact_hash) = parse_uid(&request.artifact_id_hash) else {
            return Ok(Outcome::failure(format!(
                "Artifact id hash {} is not a 32-byte value",
                request.artifact_id_hash
            )));
        };
        let Some(content) = parse_fingerprint(&request.content_fingerprint) else {
            return Ok(Outcome::failure(format!(
                "Content fingerprint {} is not a SHA-256 digest",
                request.content_fingerprint
            )));
        };

        let schema = self.registry.lookup(&self.purchase_schema)?;
        let data = schema.encoder().encode(&[
            SchemaItem::new("fingerprintHash", bytes32(artifact_hash)),
            SchemaItem::new("contentFingerprint", bytes32(content)),
            SchemaItem::new("isContentAddressed", DynSolValue::Bool(request.content_addressed)),
            SchemaItem::new("auxData", bytes32(encode_aux_data(&request.aux_data))),
        ])?;

        let bundle = self
            .sign_attest(schema.uid, &schema.encoding, recipient, data, price, ref_uid)
            .await?;
        info!(
            "Signed purchase attestation for buyer {recipient} (artifact={})",
            hex::encode(artifact_hash)
        );
        Ok(Outcome::success(
            "Delegated purchase attestation signed",
            bundle,
        ))
    }

    /// Sign the revocation of `target_uid` under the schema named `schema_name`.
    ///
    /// The target must exist on the ledger, be revocable and not already be
    /// revoked; each unmet condition yields its own failed [`Outcome`].
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger is unreachable, the schema is missing,
    /// or the custody key cannot sign.
    pub async fn sign_revocation(
        &self,
        target_uid: &str,
        schema_name: &str,
    ) -> Result<Outcome<RevocationBundle>> {
        let Some(uid) = parse_uid(target_uid) else {
            return Ok(Outcome::failure(format!(
                "Attestation uid {target_uid} is not valid"
            )));
        };

        let Some(attestation) = self.ledger.attestation(uid).await? else {
            return Ok(Outcome::failure(format!(
                "Attestation [{uid}] does not exist on the ledger"
            )));
        };
        if !attestation.revocable {
            return Ok(Outcome::failure(format!(
                "Attestation [{uid}] is not revocable"
            )));
        }
        if attestation.revoked {
            return Ok(Outcome::failure(format!(
                "Attestation [{uid}] has already been revoked"
            )));
        }

        let schema = self.registry.lookup(schema_name)?;
        if attestation.schema != schema.uid {
            warn!(
                "Revoking {uid} under schema {schema_name} but it was attested under {}",
                attestation.schema
            );
        }

        let revoker = self.custody.address();
        let nonce = self.ledger.nonce(revoker).await?;
        let deadline = self.make_deadline();
        let message = Revoke {
            revoker,
            schema: schema.uid,
            uid,
            value: U256::ZERO,
            nonce,
            deadline,
        };
        let signature = self.sign(&message).await?;

        info!("Signed revocation of {uid}");
        Ok(Outcome::success(
            "Delegated revocation signed",
            RevocationBundle {
                schema_uid: schema.uid,
                uid,
                revoker,
                nonce,
                deadline,
                signature,
            },
        ))
    }

    async fn sign_attest(
        &self,
        schema_uid: B256,
        encoding: &str,
        recipient: Address,
        data: Bytes,
        value: U256,
        ref_uid: B256,
    ) -> Result<AuthorizationBundle> {
        let attester = self.custody.address();
        let nonce = self.ledger.nonce(attester).await?;
        let deadline = self.make_deadline();
        let message = Attest {
            attester,
            schema: schema_uid,
            recipient,
            expirationTime: NO_EXPIRATION,
            revocable: true,
            refUID: ref_uid,
            data: data.clone(),
            value,
            nonce,
            deadline,
        };
        let signature = self.sign(&message).await?;

        Ok(AuthorizationBundle {
            schema_uid,
            schema: encoding.to_string(),
            recipient,
            data,
            value,
            ref_uid,
            attester,
            nonce,
            deadline,
            signature,
        })
    }

    async fn sign<S: SolStruct + Sync>(&self, message: &S) -> Result<DelegatedSignature> {
        let digest = message.eip712_signing_hash(&self.domain);
        debug!("Signing {} digest {digest}", S::NAME);
        let signature = self.custody.sign_digest(digest).await?;
        Ok(signature.into())
    }
}

fn bytes32(word: B256) -> DynSolValue {
    DynSolValue::FixedBytes(word, 32)
}

/// Parse a `0x`-prefixed 20-byte address. Mixed-case input must carry a
/// valid checksum.
fn parse_wallet(input: &str) -> Option<Address> {
    let digits = input.strip_prefix("0x")?;
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mixed_case = digits.bytes().any(|b| b.is_ascii_lowercase())
        && digits.bytes().any(|b| b.is_ascii_uppercase());
    if mixed_case {
        Address::parse_checksummed(input, None).ok()
    } else {
        Address::from_str(input).ok()
    }
}

/// Parse a `0x`-prefixed 32-byte value.
fn parse_uid(input: &str) -> Option<B256> {
    let digits = input.strip_prefix("0x")?;
    if digits.len() != 64 {
        return None;
    }
    B256::from_str(digits).ok()
}

/// Parse a SHA-256 fingerprint, with or without `0x`.
fn parse_fingerprint(input: &str) -> Option<B256> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    if digits.len() != 64 {
        return None;
    }
    B256::from_str(digits).ok()
}

/// Parse a decimal ether amount into a strictly positive wei value.
fn parse_price(input: &str) -> std::result::Result<U256, String> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(format!("Price {input} must be greater than 0"));
    }
    match parse_ether(trimmed) {
        Ok(wei) if wei.is_zero() => Err(format!("Price {input} must be greater than 0")),
        Ok(wei) => Ok(wei),
        Err(_) => Err(format!("Price {input} is not a valid ether amount")),
    }
}

/// Pack short text into a right-padded `bytes32` word.
fn encode_aux_data(text: &str) -> B256 {
    let mut word = [0u8; 32];
    let len = text.len().min(MAX_AUX_DATA_LEN);
    word[..len].copy_from_slice(&text.as_bytes()[..len]);
    B256::from(word)
}
