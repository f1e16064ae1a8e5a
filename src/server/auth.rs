//! Bearer authentication for the internal relay endpoints.

use super::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Extracts the token from `Authorization: Bearer <token>`.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Compares digests so the comparison length never depends on the input.
fn token_matches(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && Sha256::digest(presented) == Sha256::digest(expected)
}

/// Rejects requests without the configured internal token.
pub async fn require_internal_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = extract_bearer(req.headers())
        .is_some_and(|token| token_matches(token, state.internal_token.expose()));
    if authorized {
        return next.run(req).await;
    }
    warn!(path = %req.uri().path(), "Rejected internal call without a valid token");
    (StatusCode::FORBIDDEN, "Access denied").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(extract_bearer(&headers), Some("s3cret"));
    }

    #[test]
    fn test_empty_configured_token_never_matches() {
        assert!(!token_matches("", ""));
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret ", "s3cret"));
    }
}
