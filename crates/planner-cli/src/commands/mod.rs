//! CLI command implementations.

mod auth;

pub use auth::{dev_login, login, logout, status, whoami};

use anyhow::{Context, Result};
use auth_bootstrap::AuthBootstrap;
use planner_auth::{AuthManager, IdentityProvider, ProviderConfig, SupabaseProvider};
use planner_config::{Config, Paths};
use request_gateway::{QueryCache, RequestGateway, RetryPolicy};
use std::sync::Arc;
use tracing::debug;

/// Wire the auth stack from local config. This is the one composition root.
pub fn build_bootstrap(paths: &Paths, config: &Config) -> Result<AuthBootstrap> {
    paths
        .ensure_dirs()
        .context("Failed to create the planner directory")?;

    let api_base_url = config.api_base_url()?;
    let store = Arc::new(session_store::create_file_session_store(paths.auth_file()));

    let provider: Arc<dyn IdentityProvider> = match config.pinned_provider() {
        Some((supabase_url, supabase_anon_key)) => {
            debug!(supabase_url = %supabase_url, "Using pinned identity provider config");
            Arc::new(SupabaseProvider::pinned(ProviderConfig {
                supabase_url,
                supabase_anon_key,
            }))
        }
        None => Arc::new(SupabaseProvider::from_backend(api_base_url.clone())),
    };

    let auth = AuthManager::new(provider, store.clone());
    let gateway = RequestGateway::new(api_base_url, store, auth.clone())
        .context("Failed to build HTTP client")?;
    let cache = Arc::new(QueryCache::new(
        RetryPolicy::default(),
        config.query_stale_time(),
    ));

    Ok(AuthBootstrap::new(
        auth,
        gateway,
        cache,
        config.oauth_redirect_url.clone(),
    ))
}
