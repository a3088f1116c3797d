use thiserror::Error;

/// Result type alias for upstream API calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by an upstream API endpoint.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The API token could not be encoded as a header value.
    #[error("Invalid API token: {0}")]
    InvalidToken(String),

    /// The configured endpoint is not a usable URL.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The response body did not have the expected shape.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The endpoint answered with a non-success status code.
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        /// Name of the operation that failed.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, as returned by the API.
        body: String,
    },

    /// The endpoint could not be reached at all.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),
}

impl Error {
    /// Whether the failure says something about the endpoint rather than
    /// about the requested resource.
    ///
    /// An endpoint that answered with a regular error status is alive; the
    /// same request would most likely fail on every other cluster member
    /// too. Transport failures and gateway-class statuses mean the endpoint
    /// itself is unhealthy.
    #[must_use]
    pub fn is_endpoint_failure(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_status(),
            Self::Status { status, .. } => matches!(status, 502..=504),
            Self::InvalidToken(_) | Self::InvalidUrl { .. } | Self::Unreachable(_) => true,
            Self::Json(_) => false,
        }
    }
}
