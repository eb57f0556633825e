//! Resilient request layer.
//!
//! - [`RequestGateway`]: attaches credentials, refreshes once on 401 and
//!   classifies failures into [`ErrorClassification`]
//! - [`QueryCache`]: keyed query cache that retries network and 5xx failures
//!   under a [`RetryPolicy`] and never retries mutations

mod cache;
mod error;
mod gateway;
mod retry;

pub use cache::{QueryCache, DEFAULT_STALE_TIME};
pub use error::{ErrorClassification, RequestError, RequestResult};
pub use gateway::{ApiRequest, FormPart, GatewayEvent, RequestBody, RequestGateway};
pub use retry::RetryPolicy;
pub use reqwest::Method;
