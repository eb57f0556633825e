//! Configuration, filesystem paths and logging setup for the planner auth stack.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_BASE_URL, DEFAULT_LOG_LEVEL, DEFAULT_OAUTH_REDIRECT_URL,
    DEFAULT_QUERY_STALE_TIME_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use paths::Paths;
