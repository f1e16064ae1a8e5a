//! Purchase-specific artifact generation.

use super::png;
use crate::error::{Error, Result};
use crate::storage::{
    BlobStore, ContentStore, GeneratedArtifact, Listing, MarketStore, NewArtifact, StorageMedium,
    User,
};
use alloy::primitives::{keccak256, B256};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata key carrying the purchase time (unix milliseconds).
pub const PURCHASE_TIMESTAMP_KEY: &str = "purchaseTimestamp";

/// Metadata key carrying the buyer's wallet.
pub const BUYER_WALLET_KEY: &str = "buyerWalletAddress";

const PNG_MIME: &str = "image/png";

/// Re-encodes images into PNG.
pub trait Transcoder: Send + Sync {
    /// Convert `bytes` of type `mime_type` into PNG.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the input cannot be converted.
    fn to_png(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<u8>>;
}

/// Re-encodes any raster format the `image` crate decodes.
///
/// The format is sniffed from the bytes first; the declared MIME type is
/// only consulted when sniffing fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageTranscoder;

impl Transcoder for ImageTranscoder {
    fn to_png(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(bytes)
            .or_else(|sniff_err| match ImageFormat::from_mime_type(mime_type) {
                Some(format) => image::load_from_memory_with_format(bytes, format),
                None => Err(sniff_err),
            })
            .map_err(|e| Error::Storage(format!("cannot decode {mime_type} original: {e}")))?;
        png::encode(&decoded)
    }
}

/// Derives buyer-stamped copies of listings.
pub struct ArtifactIssuer {
    store: Arc<dyn MarketStore>,
    blobs: Arc<dyn BlobStore>,
    content: Arc<dyn ContentStore>,
    transcoder: Arc<dyn Transcoder>,
}

impl ArtifactIssuer {
    /// Create an issuer.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketStore>,
        blobs: Arc<dyn BlobStore>,
        content: Arc<dyn ContentStore>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            store,
            blobs,
            content,
            transcoder,
        }
    }

    /// Generate and persist the artifact for `buyer` purchasing `listing`.
    ///
    /// The original is re-encoded to PNG when needed and stamped with the
    /// purchase time and the buyer's wallet. The same inputs always yield the
    /// same fingerprint; a second artifact with an existing fingerprint is
    /// rejected with `Conflict` before anything is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the original cannot be read or converted, the
    /// fingerprint already exists, or storage fails.
    pub async fn generate_purchase_artifact(
        &self,
        listing: &Listing,
        buyer: &User,
        content_addressed: bool,
        purchased_at: DateTime<Utc>,
    ) -> Result<GeneratedArtifact> {
        let original = match listing.medium {
            StorageMedium::Conventional => self.blobs.get(&listing.locator).await?,
            StorageMedium::ContentAddressed => self.content.get(&listing.locator).await?,
        };

        let encoded = if listing.mime_type == PNG_MIME && png::is_png(&original) {
            original.to_vec()
        } else {
            debug!("Transcoding {} from {}", listing.id, listing.mime_type);
            self.transcoder.to_png(&original, &listing.mime_type)?
        };

        let purchased_ms = purchased_at.timestamp_millis().to_string();
        let stamped = png::insert_text(
            &encoded,
            &[
                (PURCHASE_TIMESTAMP_KEY, purchased_ms.as_str()),
                (BUYER_WALLET_KEY, buyer.wallet_address.as_str()),
            ],
        )?;
        let fingerprint = hex::encode(Sha256::digest(&stamped));

        if self.store.artifact_by_fingerprint(&fingerprint).await?.is_some() {
            return Err(Error::Conflict(format!(
                "artifact {fingerprint} already generated"
            )));
        }

        let medium = StorageMedium::from_flag(content_addressed);
        let bytes = Bytes::from(stamped);
        let locator = match medium {
            StorageMedium::Conventional => {
                let locator = format!("generated/{fingerprint}.png");
                self.blobs.put(&locator, bytes).await?;
                locator
            }
            StorageMedium::ContentAddressed => self.content.add(bytes).await?,
        };

        let artifact = self
            .store
            .insert_artifact(&NewArtifact {
                listing_id: listing.id,
                original_name: purchased_name(&listing.original_name, &buyer.username),
                mime_type: PNG_MIME.to_string(),
                content_fingerprint: fingerprint,
                medium,
                locator,
            })
            .await?;

        info!(
            "Generated {} artifact {} for listing {} (fingerprint={})",
            artifact.medium, artifact.id, listing.id, artifact.content_fingerprint
        );
        Ok(artifact)
    }
}

/// Identifier hash committed to in the purchase attestation: keccak-256 of
/// the content id for content-addressed artifacts, of the record id otherwise.
#[must_use]
pub fn artifact_id_hash(artifact: &GeneratedArtifact) -> B256 {
    match artifact.medium {
        StorageMedium::ContentAddressed => keccak256(artifact.locator.as_bytes()),
        StorageMedium::Conventional => keccak256(artifact.id.to_string().as_bytes()),
    }
}

fn purchased_name(original_name: &str, username: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("photo");
    format!("purchased_{stem}_{username}.png")
}
