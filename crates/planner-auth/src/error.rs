//! Identity provider error types.

use thiserror::Error;

/// Failure of an identity-provider operation.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider URL or key missing or unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the provider
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("Identity provider rejected the request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Malformed or failed OAuth callback
    #[error("Sign-in callback failed: {0}")]
    Callback(String),

    /// Operation needs a session and there is none
    #[error("No active session")]
    NoSession,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ProviderError {
    /// Returns true if the failure may clear up on its own.
    ///
    /// Connection failures, timeouts and 5xx responses are transient;
    /// rejections of the credentials themselves are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                e.status().is_some_and(|status| status.is_server_error())
            }
            ProviderError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using ProviderError.
pub type ProviderResult<T> = Result<T, ProviderError>;
