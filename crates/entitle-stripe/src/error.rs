//! Error type for Stripe operations.

/// Result type for Stripe operations.
pub type Result<T> = std::result::Result<T, StripeError>;

/// Errors that can occur talking to the Stripe API.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type (e.g. `invalid_request_error`).
        error_type: String,
        /// Error message.
        message: String,
        /// Error code, when present.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StripeError {
    /// Whether the error is Stripe's `resource_missing` (safe to treat as
    /// already-gone on cancellation paths).
    #[must_use]
    pub fn is_resource_missing(&self) -> bool {
        matches!(self, Self::Api { code: Some(code), .. } if code == "resource_missing")
    }
}
