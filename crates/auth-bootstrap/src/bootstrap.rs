//! One-time auth initialization and the reactive façade over it.
//!
//! [`AuthBootstrap::initialize`] runs the startup sequence once per process:
//! provider init, provider session lookup, reconciliation with the local
//! record, server id resolution, then the provider listener. State is
//! published as [`AuthSnapshot`] values on a watch channel; screen changes
//! go out as [`Navigation`] values.

use crate::auth_fsm::{AuthPhase, PhaseInput, PhaseMachine};
use crate::error::{BootstrapError, BootstrapResult};
use crate::navigation::Navigation;
use crate::state::{AuthSnapshot, UserProfile};
use parking_lot::Mutex;
use planner_auth::{
    AuthListener, AuthManager, OAuthProvider, OAuthStart, ProviderError, Session, SessionTokens,
};
use request_gateway::{ApiRequest, GatewayEvent, QueryCache, RequestError, RequestGateway};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const PROFILE_PATH: &str = "/api/auth/user";
const DEV_LOGIN_PATH: &str = "/api/auth/dev-login";

#[derive(Debug, Deserialize)]
struct DevLoginResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "refreshToken")]
    refresh_token: String,
    #[serde(default, alias = "expiresIn")]
    expires_in: Option<i64>,
}

struct Inner {
    auth: AuthManager,
    gateway: RequestGateway,
    cache: Arc<QueryCache>,
    redirect_url: String,
    initialized: OnceCell<()>,
    state: watch::Sender<AuthSnapshot>,
    machine: Mutex<PhaseMachine>,
    navigation: broadcast::Sender<Navigation>,
    listener: Mutex<Option<AuthListener>>,
    /// Startup could not resolve a profile for the provider session.
    /// Listener echoes of that session must not fetch it again.
    profile_rejected: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The auth façade. Clones share state.
#[derive(Clone)]
pub struct AuthBootstrap {
    inner: Arc<Inner>,
}

impl AuthBootstrap {
    pub fn new(
        auth: AuthManager,
        gateway: RequestGateway,
        cache: Arc<QueryCache>,
        redirect_url: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        let (navigation, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                auth,
                gateway,
                cache,
                redirect_url: redirect_url.into(),
                initialized: OnceCell::new(),
                state,
                machine: Mutex::new(PhaseMachine::new()),
                navigation,
                listener: Mutex::new(None),
                profile_rejected: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Follow state changes.
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn navigation(&self) -> broadcast::Receiver<Navigation> {
        self.inner.navigation.subscribe()
    }

    pub fn auth(&self) -> &AuthManager {
        &self.inner.auth
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.inner.gateway
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    /// Run the startup sequence if it has not run yet, then make sure the
    /// provider listener is attached. Safe to call on every mount.
    pub async fn initialize(&self) {
        self.inner
            .initialized
            .get_or_init(|| self.run_initialization())
            .await;
        self.attach_listeners();
    }

    /// Detach the provider listener and stop background work.
    pub fn teardown(&self) {
        if self.inner.listener.lock().take().is_some() {
            info!("Auth listener detached on teardown");
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }

    async fn run_initialization(&self) {
        self.advance(PhaseInput::Start);
        self.update(|s| s.is_loading = true);
        info!("Auth bootstrap started");

        let provider = self.inner.auth.provider().clone();
        if let Err(err) = provider.initialize().await {
            warn!(error = %err, "Identity provider failed to initialize");
            self.settle_unauthenticated(Some(err.to_string()), PhaseInput::Failed);
            return;
        }

        let provider_session = match provider.get_session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "Could not read provider session");
                None
            }
        };

        match (self.inner.auth.auth_data(), provider_session) {
            (Some(local), provider_session) => {
                let diverged = provider_session
                    .as_ref()
                    .map_or(true, |session| session.access_token != local.access_token);
                let expired = local.is_expired();

                if diverged || expired {
                    debug!(diverged, expired, "Local record needs a silent refresh");
                    if !self.inner.auth.refresh_token().await {
                        warn!(user_id = %local.user_id, "Silent refresh failed, keeping local record");
                        self.settle_unauthenticated(
                            Some("Session could not be refreshed".to_string()),
                            PhaseInput::Failed,
                        );
                        return;
                    }
                }

                let session = match provider.get_session().await {
                    Ok(Some(session)) => session,
                    Ok(None) | Err(_) => {
                        self.settle_unauthenticated(
                            Some("Identity provider has no session".to_string()),
                            PhaseInput::Failed,
                        );
                        return;
                    }
                };
                // The record may predate server id resolution.
                if self.verify_session(session, None).await.is_err() {
                    self.inner.profile_rejected.store(true, Ordering::SeqCst);
                }
            }
            (None, Some(session)) => {
                let bearer = session.access_token.clone();
                if self.verify_session(session, Some(bearer)).await.is_err() {
                    self.inner.profile_rejected.store(true, Ordering::SeqCst);
                }
            }
            (None, None) => {
                info!("No session found");
                self.settle_unauthenticated(None, PhaseInput::NoSession);
            }
        }
    }

    /// Fetch the server profile for `session` and settle the state on it.
    async fn verify_session(
        &self,
        session: Session,
        bearer: Option<String>,
    ) -> BootstrapResult<UserProfile> {
        self.update(|s| {
            s.session = Some(session.clone());
            s.is_loading = true;
        });

        match self.fetch_profile(bearer).await {
            Ok(profile) => {
                self.inner.profile_rejected.store(false, Ordering::SeqCst);
                let data = self.inner.auth.save_auth_data(&session, Some(&profile.id));
                info!(user_id = %data.user_id, "Authenticated");
                self.advance(PhaseInput::Verified);
                self.update(|s| {
                    s.session = Some(session);
                    s.user = Some(profile.clone());
                    s.error = None;
                    s.is_loading = false;
                    s.is_initialized = true;
                });
                Ok(profile)
            }
            Err(err) => {
                warn!(error = %err, classification = ?err.classification(), "Profile fetch failed");
                self.settle_unauthenticated(Some(err.to_string()), PhaseInput::Failed);
                Err(err.into())
            }
        }
    }

    async fn fetch_profile(&self, bearer: Option<String>) -> Result<UserProfile, RequestError> {
        let mut request = ApiRequest::get(PROFILE_PATH);
        request.bearer_override = bearer;
        self.inner.gateway.send_json(&request).await
    }

    fn attach_listeners(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Session>>();
        let Some(attached) = self.inner.auth.setup_auth_listener(Box::new(move |session| {
            let _ = tx.send(session);
        })) else {
            return;
        };
        *listener = Some(attached);
        drop(listener);

        let this = self.clone();
        let session_pump = tokio::spawn(async move {
            while let Some(session) = rx.recv().await {
                this.on_session_change(session).await;
            }
        });

        let mut gateway_events = self.inner.gateway.subscribe();
        let this = self.clone();
        let gateway_pump = tokio::spawn(async move {
            loop {
                match gateway_events.recv().await {
                    Ok(GatewayEvent::SessionExpired) => this.on_session_expired(),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.inner.tasks.lock().extend([session_pump, gateway_pump]);
    }

    async fn on_session_change(&self, session: Option<Session>) {
        match session {
            Some(session) => {
                let needs_profile = self.inner.state.borrow().user.is_none();
                if needs_profile && self.inner.profile_rejected.load(Ordering::SeqCst) {
                    debug!("Profile already failed for this session, staying unauthenticated");
                    self.update(|s| s.session = Some(session));
                } else if needs_profile {
                    debug!("Session without profile, fetching it");
                    let _ = self.verify_session(session, None).await;
                } else {
                    self.update(|s| s.session = Some(session));
                }
            }
            None => {
                debug!("Provider reports no session");
                self.inner.profile_rejected.store(false, Ordering::SeqCst);
                self.advance(PhaseInput::SignedOut);
                self.update(|s| {
                    s.session = None;
                    s.user = None;
                    s.is_loading = false;
                    s.is_initialized = true;
                });
            }
        }
    }

    fn on_session_expired(&self) {
        warn!("Session expired, sending user to login");
        self.advance(PhaseInput::SessionExpired);
        self.update(|s| {
            s.error = Some(RequestError::session_expired().to_string());
            s.is_loading = false;
        });
        self.navigate(Navigation::login("Session expired"));
    }

    /// Start Google sign-in and return the URL to open.
    pub async fn sign_in_with_google(&self) -> BootstrapResult<OAuthStart> {
        let provider = self.inner.auth.provider();
        let result = async {
            provider.initialize().await?;
            provider
                .sign_in_with_oauth(OAuthProvider::Google, &self.inner.redirect_url)
                .await
        }
        .await;

        result.map_err(|err| self.surface_provider_error(err))
    }

    /// Finish an OAuth redirect: exchange the code and resolve the profile.
    pub async fn complete_sign_in(&self, callback_url: &str) -> BootstrapResult<UserProfile> {
        let url = Url::parse(callback_url)?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if let Some(error) = param("error") {
            let reason = match param("error_description") {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(self.surface_provider_error(ProviderError::Callback(reason)));
        }

        let code = param("code").ok_or_else(|| {
            self.surface_provider_error(ProviderError::Callback(
                "callback is missing the authorization code".to_string(),
            ))
        })?;

        let session = self
            .inner
            .auth
            .provider()
            .exchange_code_for_session(&code)
            .await
            .map_err(|err| self.surface_provider_error(err))?;

        let bearer = session.access_token.clone();
        let profile = self.verify_session(session, Some(bearer)).await?;
        self.navigate(Navigation::Home);
        Ok(profile)
    }

    /// Whether the backend offers development login.
    pub async fn dev_login_available(&self) -> bool {
        match self
            .inner
            .gateway
            .send_raw(&ApiRequest::get(DEV_LOGIN_PATH))
            .await
        {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "Development login unavailable");
                false
            }
        }
    }

    /// Sign in through the development login endpoint.
    pub async fn dev_login(&self, email: &str) -> BootstrapResult<UserProfile> {
        let body = serde_json::json!({ "email": email });
        let response: DevLoginResponse = self
            .inner
            .gateway
            .send_json(&ApiRequest::post(DEV_LOGIN_PATH).json(body))
            .await?;

        let session = self
            .inner
            .auth
            .provider()
            .set_session(SessionTokens {
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_in: response.expires_in,
            })
            .await
            .map_err(|err| self.surface_provider_error(err))?;

        let bearer = session.access_token.clone();
        let profile = self.verify_session(session, Some(bearer)).await?;
        self.navigate(Navigation::Home);
        Ok(profile)
    }

    /// Re-fetch the server profile.
    pub async fn refresh_profile(&self) -> BootstrapResult<UserProfile> {
        match self.fetch_profile(None).await {
            Ok(profile) => {
                self.inner.profile_rejected.store(false, Ordering::SeqCst);
                self.update(|s| {
                    s.user = Some(profile.clone());
                    s.error = None;
                });
                Ok(profile)
            }
            Err(err) => {
                self.update(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Sign out everywhere this device knows about and return to login.
    pub async fn logout(&self) {
        info!("Logging out");
        self.advance(PhaseInput::LogoutRequested);

        if let Err(err) = self.inner.auth.provider().sign_out().await {
            warn!(error = %err, "Provider sign-out failed, clearing local state anyway");
        }
        self.inner.auth.clear_auth_data();
        self.inner.cache.clear();
        self.inner.profile_rejected.store(false, Ordering::SeqCst);

        self.advance(PhaseInput::LogoutComplete);
        self.update(|s| {
            s.session = None;
            s.user = None;
            s.error = None;
            s.is_loading = false;
        });
        self.navigate(Navigation::Login { reason: None });
    }

    fn surface_provider_error(&self, err: ProviderError) -> BootstrapError {
        let reason = err.to_string();
        warn!(reason = %reason, "Sign-in failed");
        self.update(|s| {
            s.error = Some(reason.clone());
            s.is_loading = false;
        });
        self.navigate(Navigation::login(reason));
        err.into()
    }

    fn settle_unauthenticated(&self, error: Option<String>, input: PhaseInput) {
        self.advance(input);
        self.update(|s| {
            s.user = None;
            s.error = error;
            s.is_loading = false;
            s.is_initialized = true;
        });
    }

    fn advance(&self, input: PhaseInput) {
        let phase = {
            let mut machine = self.inner.machine.lock();
            if machine.consume(&input).is_err() {
                debug!(input = ?input, state = ?machine.state(), "Ignoring phase input");
            }
            AuthPhase::from(machine.state())
        };
        self.update(|s| s.phase = phase);
    }

    fn update(&self, apply: impl FnOnce(&mut AuthSnapshot)) {
        self.inner.state.send_modify(|snapshot| {
            apply(snapshot);
            snapshot.recompute();
        });
    }

    fn navigate(&self, to: Navigation) {
        debug!(path = to.path(), "Navigating");
        let _ = self.inner.navigation.send(to);
    }
}
