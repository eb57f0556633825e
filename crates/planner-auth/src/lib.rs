//! Identity provider access and the local credential lifecycle.
//!
//! This crate provides:
//! - [`IdentityProvider`]: the provider seam, with a GoTrue implementation
//!   ([`SupabaseProvider`]) doing OAuth with PKCE, code exchange and refresh
//! - [`AuthManager`]: saves, refreshes and clears the persisted credential,
//!   keeps the backend-confirmed user id sticky, and coalesces refreshes
//! - [`AuthListener`]: the single provider-event listener per manager

mod error;
mod manager;
mod pkce;
mod provider;
mod supabase_client;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ProviderError, ProviderResult};
pub use manager::{AuthListener, AuthManager, SessionCallback};
pub use provider::{AuthSubscription, IdentityProvider};
pub use supabase_client::{ProviderConfig, SupabaseProvider};
pub use types::{AuthChangeEvent, AuthEventKind, OAuthProvider, OAuthStart, Session, SessionTokens};
