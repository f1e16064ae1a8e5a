//! Business-rule result convention.
//!
//! Operations that can fail for business reasons (bad address, non-positive
//! price, attestation already revoked, ...) return `Result<Outcome<T>>`: the
//! outer `Result` carries infrastructure failures, the [`Outcome`] carries a
//! success flag, a human-readable message and, on success, a payload.

use serde::Serialize;

/// Outcome of a business operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome<T> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<T>,
}

impl<T> Outcome<T> {
    /// A successful outcome carrying `payload`.
    pub fn success(message: impl Into<String>, payload: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: Some(payload),
        }
    }

    /// A business-rule failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: None,
        }
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The message describing the outcome.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The payload, present only on success.
    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Consume the outcome, returning the payload if any.
    #[must_use]
    pub fn into_payload(self) -> Option<T> {
        self.payload
    }

    /// Map the payload, keeping flag and message.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            success: self.success,
            message: self.message,
            payload: self.payload.map(f),
        }
    }
}
