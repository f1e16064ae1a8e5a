//! Request handlers.

use super::AppState;
use crate::confirmed::{PurchaseConfirmed, RegistrationConfirmed, RevocationConfirmed};
use crate::error::Error;
use crate::reconciler::Reconciliation;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, instrument};

/// Error response of a handler.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::LinkNotFound | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::LinkExpired | Error::LinkExhausted => StatusCode::GONE,
            other => {
                error!("Request failed: {other}");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

/// `POST /internal/ledger/registration-confirmed`
pub async fn registration_confirmed(
    State(state): State<AppState>,
    Json(payload): Json<RegistrationConfirmed>,
) -> Result<Json<Reconciliation>, ApiError> {
    Ok(Json(state.reconciler.apply_registration(&payload).await?))
}

/// `POST /internal/ledger/revocation-confirmed`
pub async fn revocation_confirmed(
    State(state): State<AppState>,
    Json(payload): Json<RevocationConfirmed>,
) -> Result<Json<Reconciliation>, ApiError> {
    Ok(Json(state.reconciler.apply_revocation(&payload).await?))
}

/// `POST /internal/ledger/purchase-confirmed`
pub async fn purchase_confirmed(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseConfirmed>,
) -> Result<Json<Reconciliation>, ApiError> {
    Ok(Json(state.reconciler.apply_purchase(&payload).await?))
}

/// `GET /download/{token}`
///
/// Content-addressed links redirect to the public gateway and are not
/// counted. Conventional links stream from blob storage; the download is
/// recorded once the object is open, immediately before streaming starts.
#[instrument(skip(state, token))]
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let link = state.links.resolve(&token).await?;
    if link.medium.is_content_addressed() {
        debug!("Redirecting to {}", link.url);
        // 303 See Other.
        return Ok(Redirect::to(&link.url).into_response());
    }

    // Refuse early without touching storage; the consume below is authoritative.
    if link.is_expired(Utc::now()) {
        return Err(Error::LinkExpired.into());
    }
    if link.is_exhausted() {
        return Err(Error::LinkExhausted.into());
    }

    let artifact = state
        .store
        .artifact(link.artifact_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("artifact {}", link.artifact_id)))?;
    let stream = state.blobs.open(&artifact.locator).await?;
    let consumed = state.links.record_download(&token).await?;
    debug!(
        "Streaming {} ({}/{:?})",
        artifact.locator, consumed.download_count, consumed.max_downloads
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.original_name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: &'static str,
    /// Database connectivity.
    pub database: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "up",
                version: env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(e) => {
            error!("Health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    database: "down",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    }
}
