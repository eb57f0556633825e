//! Session and event types shared by every identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provider-issued session. Lives in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The provider's own id for the user. Not necessarily the backend's id.
    pub provider_user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub provider_expiry: DateTime<Utc>,
    /// The provider's `user_metadata` object.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.provider_expiry <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Display name from the metadata, if the provider supplied one.
    pub fn display_name(&self) -> Option<String> {
        self.metadata_str(&["full_name", "name"])
    }

    /// Avatar URL from the metadata, if the provider supplied one.
    pub fn avatar_url(&self) -> Option<String> {
        self.metadata_str(&["avatar_url", "picture"])
    }

    fn metadata_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.metadata.get(*key))
            .filter_map(|value| value.as_str())
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Tokens handed to [`crate::IdentityProvider::set_session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds, when the issuer reports one.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Supported OAuth identity sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

/// Result of starting an OAuth sign-in.
#[derive(Debug, Clone)]
pub struct OAuthStart {
    pub provider: OAuthProvider,
    /// Where the user agent must be sent to authenticate.
    pub url: String,
}

/// Kind of provider state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// Delivered once, first, to every new subscriber.
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A provider state change and the session it leaves behind, if any.
#[derive(Debug, Clone)]
pub struct AuthChangeEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthChangeEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}
