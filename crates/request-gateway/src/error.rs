//! Request failure taxonomy.

use planner_auth::ProviderError;
use serde::Serialize;
use thiserror::Error;

/// Coarse failure class that drives retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Network,
    Auth,
    Http,
    Provider,
}

/// Failure of a gateway call.
#[derive(Error, Debug)]
pub enum RequestError {
    /// No response reached us
    #[error("Network error: {0}")]
    Network(reqwest::Error),

    /// The request could not be built, so nothing was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unauthorized after the one refresh-and-retry
    #[error("{0}")]
    Auth(String),

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The identity provider call itself failed
    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Success status with a body we could not parse
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RequestError {
    pub fn session_expired() -> Self {
        RequestError::Auth("Session expired".to_string())
    }

    pub fn classification(&self) -> ErrorClassification {
        match self {
            RequestError::Network(_) => ErrorClassification::Network,
            RequestError::Auth(_) => ErrorClassification::Auth,
            RequestError::Http { .. }
            | RequestError::InvalidRequest(_)
            | RequestError::Decode(_)
            | RequestError::InvalidUrl(_) => ErrorClassification::Http,
            RequestError::Provider(_) => ErrorClassification::Provider,
        }
    }

    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network failures and 5xx responses may be retried. Nothing else may.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Network(_) => true,
            RequestError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            RequestError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            RequestError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RequestError::Http {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            RequestError::Network(err)
        }
    }
}

/// Result type alias using RequestError.
pub type RequestResult<T> = Result<T, RequestError>;
