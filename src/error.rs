//! Error types for lensmark.
//!
//! [`Error`] covers infrastructure failures (database, ledger RPC, signing key,
//! storage, configuration) and the download-link consumption rejections.
//! Business-rule failures are not errors; they are reported through
//! [`crate::Outcome`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by lensmark components.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Ledger RPC unreachable or returned an unusable answer.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// The custody key could not be loaded or could not sign.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A named schema is absent from the configured registry source.
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// A registered schema does not match the data being encoded.
    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    /// Blob storage read/write failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The internal relay call could not be delivered.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Listener lifecycle misuse or transport setup failure.
    #[error("Listener error: {0}")]
    Listener(String),

    /// A unique constraint rejected a fresh record.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No download link exists for the token.
    #[error("Download link not found")]
    LinkNotFound,

    /// The download link is past its expiry.
    #[error("Download link expired")]
    LinkExpired,

    /// The download link reached its consumption ceiling.
    #[error("Download link exhausted")]
    LinkExhausted,

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for the download-link rejections a caller can present
    /// directly to the end user.
    #[must_use]
    pub fn is_link_rejection(&self) -> bool {
        matches!(
            self,
            Self::LinkNotFound | Self::LinkExpired | Self::LinkExhausted
        )
    }

    /// Returns true if this database error is a unique constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            Self::Conflict(_) => true,
            _ => false,
        }
    }
}
