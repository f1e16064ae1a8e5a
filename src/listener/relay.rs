//! Authenticated delivery of confirmed events to the reconciler.

use crate::config::{ListenerConfig, Secret};
use crate::confirmed::ConfirmedEvent;
use crate::error::{Error, Result};
use crate::reconciler::{ReconcileStatus, Reconciliation};
use async_trait::async_trait;
use tracing::debug;

/// Delivers confirmed events to the reconciler.
#[async_trait]
pub trait EventRelay: Send + Sync {
    /// Deliver `event` and return how the reconciler handled it.
    ///
    /// # Errors
    ///
    /// Returns `Relay` if the event could not be delivered or the reconciler
    /// answered with a failure status.
    async fn relay(&self, event: &ConfirmedEvent) -> Result<ReconcileStatus>;
}

/// [`EventRelay`] posting to the reconciler's internal HTTP endpoints.
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
    token: Secret,
}

impl HttpRelay {
    /// Create a relay from listener configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no bearer token is configured, or `Relay` if the
    /// HTTP client cannot be built.
    pub fn new(config: &ListenerConfig) -> Result<Self> {
        if config.internal_token.is_empty() {
            return Err(Error::Config(
                "internal bearer token is required to relay events".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.relay_timeout())
            .build()
            .map_err(|e| Error::Relay(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.reconciler_url.trim_end_matches('/').to_string(),
            token: config.internal_token.clone(),
        })
    }

    fn endpoint(&self, event: &ConfirmedEvent) -> String {
        format!("{}{}", self.base_url, event.kind().relay_path())
    }
}

#[async_trait]
impl EventRelay for HttpRelay {
    async fn relay(&self, event: &ConfirmedEvent) -> Result<ReconcileStatus> {
        let url = self.endpoint(event);
        let body = event.to_json()?;
        debug!(event = %event.idempotency_key(), "POST {url}");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Relay(format!("POST {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Relay(format!("POST {url} returned {status}")));
        }
        let reconciliation: Reconciliation = response
            .json()
            .await
            .map_err(|e| Error::Relay(format!("unreadable response from {url}: {e}")))?;
        Ok(reconciliation.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::confirmed::RevocationConfirmed;

    #[test]
    fn test_missing_token_is_rejected() {
        let err = HttpRelay::new(&ListenerConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_endpoint_joins_base_and_kind() {
        let relay = HttpRelay::new(&ListenerConfig {
            reconciler_url: "http://node.internal:8080/".to_string(),
            internal_token: Secret::new("t0ken"),
            ..ListenerConfig::default()
        })
        .unwrap();
        let event = ConfirmedEvent::Revocation(RevocationConfirmed {
            attestation_uid: "0x01".to_string(),
            owner_address: "0x11".to_string(),
        });
        assert_eq!(
            relay.endpoint(&event),
            "http://node.internal:8080/internal/ledger/revocation-confirmed"
        );
    }
}
