//! Bootstrap error types.

use planner_auth::ProviderError;
use request_gateway::RequestError;
use thiserror::Error;

/// Failure of a façade operation.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Identity provider failure, including bad sign-in callbacks
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Backend call failure
    #[error(transparent)]
    Request(#[from] RequestError),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BootstrapError {
    /// Message shown to the user on the login screen.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Result type alias using BootstrapError.
pub type BootstrapResult<T> = Result<T, BootstrapError>;
