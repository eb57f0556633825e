//! Supabase (GoTrue) identity provider.
//!
//! Talks to the GoTrue REST API directly:
//! - `/auth/v1/authorize` for OAuth with a PKCE S256 challenge
//! - `/auth/v1/token?grant_type=pkce|refresh_token` for code exchange and refresh
//! - `/auth/v1/user` to validate adopted tokens
//! - `/auth/v1/logout` to end the session
//!
//! The project URL and anon key either come pinned from local config or are
//! fetched once from the backend's `/api/config/auth` endpoint.

use crate::error::{ProviderError, ProviderResult};
use crate::pkce;
use crate::provider::{AuthSubscription, IdentityProvider};
use crate::types::{AuthChangeEvent, AuthEventKind, OAuthProvider, OAuthStart, Session, SessionTokens};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

/// Session lifetime assumed when neither the response nor the JWT says.
const DEFAULT_SESSION_SECS: i64 = 3600;

const EVENT_CHANNEL_CAPACITY: usize = 32;

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Pull a readable reason out of a GoTrue error body.
fn error_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

/// Supabase project URL and public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

enum ConfigSource {
    Pinned,
    Backend(Url),
}

#[derive(Default)]
struct ProviderState {
    session: Option<Session>,
    pkce_verifier: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

/// `/auth/v1/user` response.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct PkceExchangeRequest<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// GoTrue-backed [`IdentityProvider`].
pub struct SupabaseProvider {
    http_client: reqwest::Client,
    source: ConfigSource,
    config: OnceCell<ProviderConfig>,
    state: Mutex<ProviderState>,
    events: broadcast::Sender<AuthChangeEvent>,
}

impl SupabaseProvider {
    /// Provider whose configuration is fetched from `{api_base_url}/api/config/auth`.
    pub fn from_backend(api_base_url: Url) -> Self {
        Self::build(ConfigSource::Backend(api_base_url), OnceCell::new())
    }

    /// Provider with a fixed project URL and key. No configuration fetch happens.
    pub fn pinned(config: ProviderConfig) -> Self {
        Self::build(ConfigSource::Pinned, OnceCell::new_with(Some(config)))
    }

    fn build(source: ConfigSource, config: OnceCell<ProviderConfig>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http_client: reqwest::Client::new(),
            source,
            config,
            state: Mutex::new(ProviderState::default()),
            events,
        }
    }

    async fn config(&self) -> ProviderResult<&ProviderConfig> {
        self.config.get_or_try_init(|| self.fetch_config()).await
    }

    async fn fetch_config(&self) -> ProviderResult<ProviderConfig> {
        let api_base_url = match &self.source {
            ConfigSource::Backend(url) => url,
            ConfigSource::Pinned => {
                return Err(ProviderError::Config(
                    "pinned provider has no configuration".to_string(),
                ))
            }
        };
        let url = api_base_url.join("/api/config/auth")?;

        debug!(url = %url, "Fetching identity provider configuration");

        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body_summary = %summarize_response_body(&body), "Provider configuration fetch failed");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: error_reason(&body),
            });
        }

        let config: ProviderConfig = response.json().await?;
        if config.supabase_url.is_empty() || config.supabase_anon_key.is_empty() {
            return Err(ProviderError::Config(
                "backend returned an empty provider URL or key".to_string(),
            ));
        }
        Url::parse(&config.supabase_url)?;

        info!(supabase_url = %config.supabase_url, "Identity provider configured");
        Ok(config)
    }

    fn auth_url(config: &ProviderConfig, path: &str) -> String {
        format!("{}/auth/v1/{}", config.supabase_url.trim_end_matches('/'), path)
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine.
        let _ = self.events.send(AuthChangeEvent::new(kind, session));
    }

    fn adopt(&self, session: Session, kind: AuthEventKind) -> Session {
        self.state.lock().session = Some(session.clone());
        self.emit(kind, Some(session.clone()));
        session
    }

    async fn check(response: reqwest::Response, what: &str) -> ProviderResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(
            status = %status,
            body_summary = %summarize_response_body(&body),
            "{} failed",
            what
        );
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            body: error_reason(&body),
        })
    }

    async fn token_request<B: Serialize + Sync>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> ProviderResult<Session> {
        let config = self.config().await?;
        let url = Self::auth_url(config, &format!("token?grant_type={}", grant_type));

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &config.supabase_anon_key)
            .json(body)
            .send()
            .await?;
        let response = Self::check(response, "Token request").await?;

        let data: TokenResponse = response.json().await?;
        let provider_expiry = match (data.expires_at, data.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0)
                .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_SESSION_SECS)),
            (None, Some(secs)) => Utc::now() + Duration::seconds(secs),
            (None, None) => Utc::now() + Duration::seconds(DEFAULT_SESSION_SECS),
        };

        Ok(Session {
            provider_user_id: data.user.id,
            email: data.user.email,
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            provider_expiry,
            metadata: data.user.user_metadata,
        })
    }

    async fn fetch_user(&self, access_token: &str) -> ProviderResult<UserResponse> {
        let config = self.config().await?;
        let response = self
            .http_client
            .get(Self::auth_url(config, "user"))
            .header("apikey", &config.supabase_anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = Self::check(response, "Session validation").await?;
        Ok(response.json().await?)
    }
}

/// Expiry claimed by a JWT, without verifying its signature.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.get("exp")?.as_i64()?, 0)
}

#[async_trait]
impl IdentityProvider for SupabaseProvider {
    async fn initialize(&self) -> ProviderResult<()> {
        self.config().await.map(|_| ())
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        let state = self.state.lock();
        Ok(state.session.clone().filter(|session| !session.is_expired()))
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_url: &str,
    ) -> ProviderResult<OAuthStart> {
        let config = self.config().await?;
        let verifier = pkce::generate_verifier();

        let mut url = Url::parse(&Self::auth_url(config, "authorize"))?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_url)
            .append_pair("code_challenge", &pkce::challenge_for(&verifier))
            .append_pair("code_challenge_method", "s256");

        self.state.lock().pkce_verifier = Some(verifier);
        info!(provider = provider.as_str(), "OAuth sign-in started");

        Ok(OAuthStart {
            provider,
            url: url.to_string(),
        })
    }

    async fn exchange_code_for_session(&self, code: &str) -> ProviderResult<Session> {
        if code.trim().is_empty() {
            return Err(ProviderError::Callback(
                "authorization code is empty".to_string(),
            ));
        }
        let verifier = self.state.lock().pkce_verifier.take().ok_or_else(|| {
            ProviderError::Callback("no sign-in is in progress on this device".to_string())
        })?;

        let session = self
            .token_request(
                "pkce",
                &PkceExchangeRequest {
                    auth_code: code,
                    code_verifier: &verifier,
                },
            )
            .await?;

        info!(provider_user_id = %session.provider_user_id, "Authorization code exchanged");
        Ok(self.adopt(session, AuthEventKind::SignedIn))
    }

    async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<Session> {
        let user = self.fetch_user(&tokens.access_token).await?;

        let provider_expiry = tokens
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs))
            .or_else(|| jwt_expiry(&tokens.access_token))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(DEFAULT_SESSION_SECS));

        let session = Session {
            provider_user_id: user.id,
            email: user.email,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            provider_expiry,
            metadata: user.user_metadata,
        };

        info!(provider_user_id = %session.provider_user_id, "Session adopted");
        Ok(self.adopt(session, AuthEventKind::SignedIn))
    }

    async fn refresh_session(
        &self,
        fallback_refresh_token: Option<&str>,
    ) -> ProviderResult<Session> {
        let refresh_token = self
            .state
            .lock()
            .session
            .as_ref()
            .map(|session| session.refresh_token.clone())
            .or_else(|| fallback_refresh_token.map(str::to_string))
            .ok_or(ProviderError::NoSession)?;

        let session = self
            .token_request(
                "refresh_token",
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
            )
            .await?;

        info!(provider_user_id = %session.provider_user_id, "Token refreshed successfully");
        Ok(self.adopt(session, AuthEventKind::TokenRefreshed))
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        let previous = {
            let mut state = self.state.lock();
            state.pkce_verifier = None;
            state.session.take()
        };

        let result = match (&previous, self.config.get()) {
            (Some(session), Some(config)) => {
                let sent = self
                    .http_client
                    .post(Self::auth_url(config, "logout"))
                    .header("apikey", &config.supabase_anon_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match sent {
                    Ok(response) => Self::check(response, "Sign-out").await.map(|_| ()),
                    Err(err) => Err(err.into()),
                }
            }
            _ => Ok(()),
        };

        self.emit(AuthEventKind::SignedOut, None);
        info!("Signed out of identity provider");
        result
    }

    fn subscribe(&self) -> AuthSubscription {
        let current = self.state.lock().session.clone();
        AuthSubscription::new(
            AuthChangeEvent::new(AuthEventKind::InitialSession, current),
            self.events.subscribe(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(user_id: &str, access: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": format!("{access}-refresh"),
            "expires_in": 3600,
            "user": {
                "id": user_id,
                "email": "ada@example.com",
                "user_metadata": { "full_name": "Ada" }
            }
        })
    }

    fn pinned(server: &MockServer) -> SupabaseProvider {
        SupabaseProvider::pinned(ProviderConfig {
            supabase_url: server.uri(),
            supabase_anon_key: "anon".into(),
        })
    }

    #[tokio::test]
    async fn test_concurrent_initialize_fetches_config_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/config/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "supabaseUrl": server.uri(),
                "supabaseAnonKey": "anon",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(SupabaseProvider::from_backend(
            Url::parse(&server.uri()).unwrap(),
        ));
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.initialize().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_initialize_surfaces_empty_config() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/config/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "supabaseUrl": "",
                "supabaseAnonKey": "",
            })))
            .mount(&server)
            .await;

        let provider = SupabaseProvider::from_backend(Url::parse(&server.uri()).unwrap());
        assert!(matches!(
            provider.initialize().await,
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth_url_carries_pkce_challenge() {
        let server = MockServer::start().await;
        let provider = pinned(&server);

        let start = provider
            .sign_in_with_oauth(OAuthProvider::Google, "http://localhost:5000/auth/callback")
            .await
            .unwrap();
        let url = Url::parse(&start.url).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/auth/v1/authorize");
        assert_eq!(pairs["provider"], "google");
        assert_eq!(pairs["redirect_to"], "http://localhost:5000/auth/callback");
        assert_eq!(pairs["code_challenge_method"], "s256");
        assert_eq!(pairs["code_challenge"].len(), 43);
    }

    #[tokio::test]
    async fn test_exchange_without_pending_sign_in_is_callback_error() {
        let server = MockServer::start().await;
        let provider = pinned(&server);

        let err = provider.exchange_code_for_session("code").await.unwrap_err();
        assert!(matches!(err, ProviderError::Callback(_)));
        let err = provider.exchange_code_for_session("  ").await.unwrap_err();
        assert!(matches!(err, ProviderError::Callback(_)));
    }

    #[tokio::test]
    async fn test_exchange_adopts_session_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "pkce"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("p-1", "tok")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = pinned(&server);
        let mut events = provider.subscribe();
        assert_eq!(
            events.recv().await.unwrap().kind,
            AuthEventKind::InitialSession
        );

        provider
            .sign_in_with_oauth(OAuthProvider::Google, "http://localhost/cb")
            .await
            .unwrap();
        let session = provider.exchange_code_for_session("abc").await.unwrap();

        assert_eq!(session.provider_user_id, "p-1");
        assert_eq!(session.display_name().as_deref(), Some("Ada"));
        assert_eq!(provider.get_session().await.unwrap(), Some(session));
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedIn);
    }

    #[tokio::test]
    async fn test_rejected_exchange_carries_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Code verifier mismatch",
            })))
            .mount(&server)
            .await;

        let provider = pinned(&server);
        provider
            .sign_in_with_oauth(OAuthProvider::Google, "http://localhost/cb")
            .await
            .unwrap();

        match provider.exchange_code_for_session("abc").await {
            Err(ProviderError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "Code verifier mismatch");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_uses_fallback_token_without_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(serde_json::json!({ "refresh_token": "persisted" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("p-1", "fresh")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = pinned(&server);
        assert!(matches!(
            provider.refresh_session(None).await,
            Err(ProviderError::NoSession)
        ));

        let session = provider.refresh_session(Some("persisted")).await.unwrap();
        assert_eq!(session.access_token, "fresh");
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn test_set_session_validates_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "p-9",
                "email": "dev@example.com",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer bad"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid JWT"))
            .mount(&server)
            .await;

        let provider = pinned(&server);
        let session = provider
            .set_session(SessionTokens {
                access_token: "good".into(),
                refresh_token: "r".into(),
                expires_in: Some(60),
            })
            .await
            .unwrap();
        assert_eq!(session.provider_user_id, "p-9");

        let err = provider
            .set_session(SessionTokens {
                access_token: "bad".into(),
                refresh_token: "r".into(),
                expires_in: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_sign_out_notifies_even_when_remote_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("p-1", "tok")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let provider = pinned(&server);
        provider.refresh_session(Some("r")).await.unwrap();

        let mut events = provider.subscribe();
        events.recv().await.unwrap();

        assert!(provider.sign_out().await.is_err());
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);
        assert!(provider.get_session().await.unwrap().is_none());
    }

    #[test]
    fn test_jwt_expiry_decodes_exp_claim() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"p-1","exp":1700000000}"#);
        let token = format!("header.{payload}.sig");
        assert_eq!(
            jwt_expiry(&token).map(|at| at.timestamp()),
            Some(1_700_000_000)
        );
        assert!(jwt_expiry("opaque-token").is_none());
    }
}
