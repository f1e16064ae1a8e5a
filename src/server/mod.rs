//! HTTP surface of the node.
//!
//! Routes:
//! - `POST /internal/ledger/{registration,revocation,purchase}-confirmed`:
//!   relay endpoints for the listener, bearer-authenticated.
//! - `GET /download/{token}`: download retrieval.
//! - `GET /health`: database connectivity.
//!
//! Every request passes through request tracing and a timeout.

mod auth;
mod handlers;

pub use handlers::{ApiError, HealthResponse};

use crate::artifact::LinkIssuer;
use crate::config::Secret;
use crate::confirmed::EventKind;
use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::storage::{BlobStore, MarketStore};
use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

/// Time allowed for a handler to produce its response head.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Applies relayed events.
    pub reconciler: Arc<Reconciler>,
    /// Resolves and consumes download links.
    pub links: Arc<LinkIssuer>,
    /// Marketplace records.
    pub store: Arc<dyn MarketStore>,
    /// Conventional artifact storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Token the listener must present.
    pub internal_token: Secret,
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    let internal_routes = Router::new()
        .route(
            EventKind::Registration.relay_path(),
            post(handlers::registration_confirmed),
        )
        .route(
            EventKind::Revocation.relay_path(),
            post(handlers::revocation_confirmed),
        )
        .route(
            EventKind::Purchase.relay_path(),
            post(handlers::purchase_confirmed),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal_token,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/download/{token}", get(handlers::download));

    with_common_layers(
        Router::new().merge(public_routes).merge(internal_routes),
        REQUEST_TIMEOUT,
    )
    .with_state(state)
}

/// Request tracing, plus `408 Request Timeout` for handlers slower than `timeout`.
fn with_common_layers<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
