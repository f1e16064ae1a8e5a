//! Download link issuance and consumption.

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::storage::{DownloadLink, MarketStore, NewLink, StorageMedium};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Validity and ceiling of a conventional link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Hours until the link expires.
    pub valid_for_hours: u32,
    /// Consumption ceiling.
    pub max_downloads: u32,
}

impl LinkOptions {
    /// Defaults for links requested on demand.
    #[must_use]
    pub fn standard(config: &LinkConfig) -> Self {
        Self {
            valid_for_hours: config.valid_hours,
            max_downloads: config.max_downloads,
        }
    }

    /// Defaults for the link granted when a purchase is confirmed.
    #[must_use]
    pub fn purchase_grant(config: &LinkConfig) -> Self {
        Self {
            valid_for_hours: config.purchase_valid_hours,
            max_downloads: config.max_downloads,
        }
    }
}

/// Issues and consumes download links.
pub struct LinkIssuer {
    store: Arc<dyn MarketStore>,
    public_base_url: String,
    gateway_url: String,
}

impl LinkIssuer {
    /// Create an issuer.
    #[must_use]
    pub fn new(store: Arc<dyn MarketStore>, config: &LinkConfig) -> Self {
        Self {
            store,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
        }
    }

    /// Return the artifact's current link, or mint one.
    ///
    /// A usable link is returned unchanged. An exhausted or expired link is
    /// deleted and replaced. Content-addressed artifacts always get a
    /// gateway link with neither expiry nor ceiling. An artifact has at most
    /// one link; concurrent callers all receive the same one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the artifact does not exist, or a storage error.
    pub async fn issue_or_reuse_download_link(
        &self,
        artifact_id: Uuid,
        buyer_id: Uuid,
        options: LinkOptions,
    ) -> Result<DownloadLink> {
        let artifact = self
            .store
            .artifact(artifact_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("artifact {artifact_id}")))?;
        let now = Utc::now();

        if let Some(existing) = self.store.link_for_artifact(artifact_id).await? {
            if existing.is_usable(now) {
                debug!("Reusing download link {} for {artifact_id}", existing.id);
                return Ok(existing);
            }
            self.store.delete_link(existing.id).await?;
            info!(
                token = %existing.token,
                "Superseded spent download link for artifact {artifact_id}"
            );
        }

        let link = match artifact.medium {
            StorageMedium::ContentAddressed => NewLink {
                artifact_id,
                buyer_id,
                medium: StorageMedium::ContentAddressed,
                token: artifact.locator.clone(),
                url: format!("{}/{}", self.gateway_url, artifact.locator),
                expires_at: None,
                max_downloads: None,
            },
            StorageMedium::Conventional => {
                let token = Uuid::new_v4().simple().to_string();
                NewLink {
                    artifact_id,
                    buyer_id,
                    medium: StorageMedium::Conventional,
                    url: format!("{}/{token}", self.public_base_url),
                    token,
                    expires_at: Some(now + Duration::hours(i64::from(options.valid_for_hours))),
                    max_downloads: Some(options.max_downloads),
                }
            }
        };

        let link = match self.store.insert_link(&link).await {
            Ok(link) => link,
            Err(Error::Conflict(reason)) => {
                // A concurrent request issued the link first.
                debug!("Lost link issuance race for {artifact_id}: {reason}");
                return self
                    .store
                    .link_for_artifact(artifact_id)
                    .await?
                    .ok_or(Error::Conflict(reason));
            }
            Err(e) => return Err(e),
        };
        info!(
            token = %link.token,
            "Issued {} download link for artifact {artifact_id}",
            link.medium
        );
        Ok(link)
    }

    /// The artifact's current link if it can still be used.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn existing_link(&self, artifact_id: Uuid) -> Result<Option<DownloadLink>> {
        let now = Utc::now();
        Ok(self
            .store
            .link_for_artifact(artifact_id)
            .await?
            .filter(|link| link.is_usable(now)))
    }

    /// Look up a link by token without consuming it.
    ///
    /// # Errors
    ///
    /// Returns `LinkNotFound` if no link carries `token`.
    pub async fn resolve(&self, token: &str) -> Result<DownloadLink> {
        self.store
            .link_by_token(token)
            .await?
            .ok_or(Error::LinkNotFound)
    }

    /// Consume one download of the link carrying `token`.
    ///
    /// The expiry and ceiling are checked and the counter incremented in a
    /// single conditional update; a rejected call writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `LinkNotFound`, `LinkExpired` or `LinkExhausted` when the
    /// download is refused, or a storage error.
    pub async fn record_download(&self, token: &str) -> Result<DownloadLink> {
        self.record_download_at(token, Utc::now()).await
    }

    /// [`Self::record_download`] evaluated at `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::record_download`].
    pub async fn record_download_at(&self, token: &str, now: DateTime<Utc>) -> Result<DownloadLink> {
        if let Some(link) = self.store.consume_link(token, now).await? {
            debug!(
                token,
                "Download {}/{:?} recorded",
                link.download_count,
                link.max_downloads
            );
            return Ok(link);
        }

        // The guard refused; classify for the caller.
        match self.store.link_by_token(token).await? {
            None => Err(Error::LinkNotFound),
            Some(link) if link.is_expired(now) => Err(Error::LinkExpired),
            Some(_) => Err(Error::LinkExhausted),
        }
    }

    /// Delete conventional links expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let pruned = self.store.prune_expired_links(now).await?;
        if pruned > 0 {
            info!("Pruned {pruned} expired download links");
        }
        Ok(pruned)
    }
}
