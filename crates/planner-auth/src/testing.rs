//! In-memory identity provider for tests.

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{AuthSubscription, IdentityProvider};
use crate::types::{AuthChangeEvent, AuthEventKind, OAuthProvider, OAuthStart, Session, SessionTokens};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Build a session that expires in an hour.
pub fn session(provider_user_id: &str, access_token: &str) -> Session {
    Session {
        provider_user_id: provider_user_id.to_string(),
        email: Some(format!("{provider_user_id}@example.com")),
        access_token: access_token.to_string(),
        refresh_token: format!("{access_token}-refresh"),
        provider_expiry: Utc::now() + Duration::hours(1),
        metadata: serde_json::json!({ "full_name": "Test User" }),
    }
}

#[derive(Default)]
struct FakeState {
    current: Option<Session>,
    refresh_result: Option<Result<Session, String>>,
    refresh_delay: Option<std::time::Duration>,
    panic_next_refresh: bool,
    init_error: Option<String>,
}

/// Scriptable [`IdentityProvider`] that counts calls.
pub struct FakeProvider {
    state: Mutex<FakeState>,
    events: broadcast::Sender<AuthChangeEvent>,
    init_calls: AtomicUsize,
    get_session_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl Default for FakeProvider {
    fn default() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(FakeState::default()),
            events,
            init_calls: AtomicUsize::new(0),
            get_session_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        let provider = Self::default();
        provider.set_current_session(Some(session));
        provider
    }

    /// What `get_session` returns.
    pub fn set_current_session(&self, session: Option<Session>) {
        self.state.lock().current = session;
    }

    /// What `refresh_session` returns. Unset means `NoSession`.
    pub fn set_refresh_result(&self, result: Result<Session, String>) {
        self.state.lock().refresh_result = Some(result);
    }

    /// Hold every refresh for `delay` before answering.
    pub fn set_refresh_delay(&self, delay: std::time::Duration) {
        self.state.lock().refresh_delay = Some(delay);
    }

    /// Make the next `refresh_session` call panic.
    pub fn panic_on_next_refresh(&self) {
        self.state.lock().panic_next_refresh = true;
    }

    pub fn fail_initialize(&self, reason: &str) {
        self.state.lock().init_error = Some(reason.to_string());
    }

    /// Broadcast an event to current subscribers.
    pub fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        let _ = self.events.send(AuthChangeEvent::new(kind, session));
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn initialize(&self) -> ProviderResult<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().init_error.clone() {
            Some(reason) => Err(ProviderError::Config(reason)),
            None => Ok(()),
        }
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().current.clone())
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_url: &str,
    ) -> ProviderResult<OAuthStart> {
        Ok(OAuthStart {
            provider,
            url: format!(
                "https://idp.test/authorize?provider={}&redirect_to={}",
                provider.as_str(),
                redirect_url
            ),
        })
    }

    async fn exchange_code_for_session(&self, code: &str) -> ProviderResult<Session> {
        if code == "bad" {
            return Err(ProviderError::Callback("invalid authorization code".into()));
        }
        let session = session("provider-raw", &format!("{code}-access"));
        self.set_current_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<Session> {
        let mut session = session("provider-raw", &tokens.access_token);
        session.refresh_token = tokens.refresh_token;
        self.set_current_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn refresh_session(
        &self,
        _fallback_refresh_token: Option<&str>,
    ) -> ProviderResult<Session> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut self.state.lock().panic_next_refresh) {
            panic!("refresh crashed");
        }
        let delay = self.state.lock().refresh_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.state.lock().refresh_result.clone();
        match result {
            Some(Ok(session)) => {
                self.set_current_session(Some(session.clone()));
                Ok(session)
            }
            Some(Err(reason)) => Err(ProviderError::Rejected {
                status: 400,
                body: reason,
            }),
            None => Err(ProviderError::NoSession),
        }
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.set_current_session(None);
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    fn subscribe(&self) -> AuthSubscription {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.state.lock().current.clone();
        AuthSubscription::new(
            AuthChangeEvent::new(AuthEventKind::InitialSession, current),
            self.events.subscribe(),
        )
    }
}
