//! Credential lifecycle: save, refresh, clear, and provider event dispatch.
//!
//! The manager is the only writer of the persisted [`AuthData`] record besides
//! explicit clears. It keeps the backend-confirmed user id sticky across
//! refreshes and collapses concurrent refreshes into one provider call.

use crate::provider::IdentityProvider;
use crate::types::{AuthChangeEvent, AuthEventKind, Session};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use session_store::{AuthData, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives `Some(session)` when signed in and `None` when signed out.
pub type SessionCallback = Box<dyn Fn(Option<Session>) + Send + Sync>;

type InFlightRefresh = Shared<BoxFuture<'static, bool>>;

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    /// Mirror of the backend-confirmed id.
    sticky_user_id: Mutex<Option<String>>,
    refresh_in_flight: Mutex<Option<InFlightRefresh>>,
    listener_active: Arc<AtomicBool>,
}

/// Handle to the credential lifecycle. Clones share state.
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

/// What a provider event means for the application.
#[derive(Debug, PartialEq)]
enum Dispatch {
    Notify(Option<Session>),
    Skip,
}

impl AuthManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<SessionStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                sticky_user_id: Mutex::new(None),
                refresh_in_flight: Mutex::new(None),
                listener_active: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.inner.provider
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    /// The persisted record, if any.
    pub fn auth_data(&self) -> Option<AuthData> {
        self.inner.store.get()
    }

    /// The backend-confirmed user id, from memory or the persisted record.
    pub fn sticky_user_id(&self) -> Option<String> {
        let mut sticky = self.inner.sticky_user_id.lock();
        if sticky.is_none() {
            *sticky = self
                .inner
                .store
                .get()
                .filter(|data| data.user_id_confirmed)
                .map(|data| data.user_id);
        }
        sticky.clone()
    }

    /// Persist `session` with a fresh 30-day deadline.
    ///
    /// `server_id` becomes the user id and is recorded as sticky. Without it
    /// an existing sticky id wins over the provider's raw id.
    pub fn save_auth_data(&self, session: &Session, server_id: Option<&str>) -> AuthData {
        let existing = self.inner.store.get();

        let (user_id, user_id_confirmed) = match server_id {
            Some(id) => {
                *self.inner.sticky_user_id.lock() = Some(id.to_string());
                (id.to_string(), true)
            }
            None => match self.sticky_user_id() {
                Some(id) => (id, true),
                None => (session.provider_user_id.clone(), false),
            },
        };

        let mut expires_at = AuthData::deadline_from(Utc::now());
        let mut name = session.display_name();
        let mut picture = session.avatar_url();
        if let Some(existing) = existing.filter(|data| data.user_id == user_id) {
            expires_at = expires_at.max(existing.expires_at);
            name = name.or(existing.name);
            picture = picture.or(existing.picture);
        }

        let data = AuthData {
            user_id,
            email: session.email.clone().unwrap_or_default(),
            access_token: session.access_token.clone(),
            refresh_token: Some(session.refresh_token.clone()),
            expires_at,
            name,
            picture,
            user_id_confirmed,
        };
        self.inner.store.set(&data);

        debug!(
            user_id = %data.user_id,
            confirmed = data.user_id_confirmed,
            "Auth data saved"
        );
        data
    }

    /// Renew credentials. Concurrent callers share one attempt.
    ///
    /// Returns false on failure. Local data is kept either way.
    pub async fn refresh_token(&self) -> bool {
        let in_flight = {
            let mut slot = self.inner.refresh_in_flight.lock();
            match slot.as_ref() {
                Some(shared) => {
                    debug!("Joining in-flight token refresh");
                    shared.clone()
                }
                None => {
                    let this = self.clone();
                    let task = tokio::spawn(async move {
                        let refreshed = this.refresh_uncoalesced().await;
                        this.inner.refresh_in_flight.lock().take();
                        refreshed
                    });
                    let owner = self.clone();
                    let shared = async move {
                        match task.await {
                            Ok(refreshed) => refreshed,
                            Err(err) => {
                                // The task never reached its own cleanup.
                                warn!(error = %err, "Token refresh task died");
                                owner.inner.refresh_in_flight.lock().take();
                                false
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        in_flight.await
    }

    async fn refresh_uncoalesced(&self) -> bool {
        match self.inner.provider.get_session().await {
            Ok(Some(session)) => {
                let data = self.save_auth_data(&session, None);
                info!(user_id = %data.user_id, "Session renewed from provider's current session");
                return true;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Could not read provider session"),
        }

        let fallback = self.inner.store.get().and_then(|data| data.refresh_token);
        match self
            .inner
            .provider
            .refresh_session(fallback.as_deref())
            .await
        {
            Ok(session) => {
                let data = self.save_auth_data(&session, None);
                info!(user_id = %data.user_id, "Token refreshed successfully");
                true
            }
            Err(err) => {
                warn!(error = %err, transient = err.is_transient(), "Token refresh failed");
                false
            }
        }
    }

    /// Remove the persisted record. Does not sign out of the provider.
    pub fn clear_auth_data(&self) {
        self.inner.store.clear();
        *self.inner.sticky_user_id.lock() = None;
        info!("Local auth data cleared");
    }

    /// Attach the one provider listener for this manager.
    ///
    /// Returns `None` if a listener is already active.
    pub fn setup_auth_listener(&self, callback: SessionCallback) -> Option<AuthListener> {
        if self
            .inner
            .listener_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Auth listener already active");
            return None;
        }

        let mut subscription = self.inner.provider.subscribe();
        let this = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Dispatch::Notify(session) = this.dispatch(event) {
                    callback(session);
                }
            }
            debug!("Auth event stream closed");
        });

        info!("Auth listener attached");
        Some(AuthListener {
            task,
            active: self.inner.listener_active.clone(),
        })
    }

    fn dispatch(&self, event: AuthChangeEvent) -> Dispatch {
        debug!(kind = ?event.kind, has_session = event.session.is_some(), "Auth event");

        if let Some(session) = event.session {
            self.save_auth_data(&session, None);
            return Dispatch::Notify(Some(session));
        }

        match event.kind {
            AuthEventKind::SignedOut => {
                self.clear_auth_data();
                Dispatch::Notify(None)
            }
            AuthEventKind::InitialSession if self.inner.store.get().is_some() => {
                debug!("No provider session yet but a local record exists, waiting");
                Dispatch::Skip
            }
            _ => Dispatch::Notify(None),
        }
    }
}

/// Active provider listener. Dropping it unsubscribes.
pub struct AuthListener {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl AuthListener {
    pub fn unsubscribe(self) {}
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.task.abort();
        self.active.store(false, Ordering::SeqCst);
        debug!("Auth listener detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session, FakeProvider};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn manager_with(provider: Arc<FakeProvider>) -> AuthManager {
        AuthManager::new(provider, Arc::new(session_store::create_memory_session_store()))
    }

    fn channel_callback() -> (SessionCallback, mpsc::UnboundedReceiver<Option<Session>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: SessionCallback = Box::new(move |session| {
            let _ = tx.send(session);
        });
        (callback, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Option<Session>>) -> Option<Session> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("callback not invoked")
            .expect("callback channel closed")
    }

    #[test]
    fn test_saving_same_session_twice_only_moves_deadline_forward() {
        let manager = manager_with(Arc::new(FakeProvider::new()));
        let s = session("p-1", "tok");

        let first = manager.save_auth_data(&s, None);
        let second = manager.save_auth_data(&s, None);

        assert!(second.expires_at >= first.expires_at);
        assert_eq!(
            AuthData {
                expires_at: 0,
                ..first
            },
            AuthData {
                expires_at: 0,
                ..second
            }
        );
    }

    #[test]
    fn test_save_without_server_id_uses_provider_id() {
        let manager = manager_with(Arc::new(FakeProvider::new()));
        let data = manager.save_auth_data(&session("p-1", "tok"), None);

        assert_eq!(data.user_id, "p-1");
        assert!(!data.user_id_confirmed);
        assert_eq!(data.name.as_deref(), Some("Test User"));
        assert!(manager.sticky_user_id().is_none());
    }

    #[test]
    fn test_server_id_is_sticky() {
        let manager = manager_with(Arc::new(FakeProvider::new()));
        manager.save_auth_data(&session("p-1", "tok"), Some("server-42"));

        let data = manager.save_auth_data(&session("p-rotated", "tok-2"), None);
        assert_eq!(data.user_id, "server-42");
        assert!(data.user_id_confirmed);
        assert_eq!(data.access_token, "tok-2");
    }

    #[test]
    fn test_sticky_id_survives_restart() {
        let store = Arc::new(session_store::create_memory_session_store());
        let provider: Arc<dyn IdentityProvider> = Arc::new(FakeProvider::new());

        AuthManager::new(provider.clone(), store.clone())
            .save_auth_data(&session("p-1", "tok"), Some("server-42"));

        let restarted = AuthManager::new(provider, store);
        let data = restarted.save_auth_data(&session("p-2", "tok-2"), None);
        assert_eq!(data.user_id, "server-42");
    }

    #[test]
    fn test_clear_drops_record_and_sticky_id() {
        let manager = manager_with(Arc::new(FakeProvider::new()));
        manager.save_auth_data(&session("p-1", "tok"), Some("server-42"));

        manager.clear_auth_data();
        assert!(manager.auth_data().is_none());

        let data = manager.save_auth_data(&session("p-1", "tok"), None);
        assert_eq!(data.user_id, "p-1");
    }

    #[tokio::test]
    async fn test_refresh_prefers_current_provider_session() {
        let provider = Arc::new(FakeProvider::with_session(session("p-rotated", "live")));
        let manager = manager_with(provider.clone());

        // Stale local record with a confirmed id and a past deadline.
        manager.save_auth_data(&session("p-1", "old"), Some("server-42"));
        let mut stale = manager.auth_data().unwrap();
        stale.expires_at = Utc::now().timestamp_millis() - 1000;
        manager.store().set(&stale);

        assert!(manager.refresh_token().await);
        assert_eq!(provider.refresh_calls(), 0);

        let data = manager.auth_data().unwrap();
        assert_eq!(data.user_id, "server-42");
        assert_eq!(data.access_token, "live");
        assert!(!data.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_explicit_refresh() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_refresh_result(Ok(session("p-1", "fresh")));
        let manager = manager_with(provider.clone());

        assert!(manager.refresh_token().await);
        assert_eq!(provider.refresh_calls(), 1);
        assert_eq!(manager.auth_data().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_local_record() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_refresh_result(Err("invalid_grant".into()));
        let manager = manager_with(provider.clone());
        let saved = manager.save_auth_data(&session("p-1", "tok"), Some("server-42"));

        assert!(!manager.refresh_token().await);
        assert_eq!(manager.auth_data(), Some(saved));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_provider_call() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_refresh_result(Ok(session("p-1", "fresh")));
        provider.set_refresh_delay(Duration::from_millis(50));
        let manager = manager_with(provider.clone());

        let results = futures_util::future::join_all((0..5).map(|_| manager.refresh_token())).await;

        assert!(results.into_iter().all(|ok| ok));
        assert_eq!(provider.refresh_calls(), 1);

        // Once settled, the next refresh is a new attempt.
        provider.set_current_session(None);
        assert!(manager.refresh_token().await);
        assert_eq!(provider.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_crashed_refresh_does_not_block_later_refreshes() {
        let provider = Arc::new(FakeProvider::new());
        provider.panic_on_next_refresh();
        let manager = manager_with(provider.clone());

        assert!(!manager.refresh_token().await);

        provider.set_refresh_result(Ok(session("p-1", "fresh")));
        assert!(manager.refresh_token().await);
        assert_eq!(provider.refresh_calls(), 2);
        assert_eq!(manager.auth_data().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_listener_persists_sessions_and_clears_on_sign_out() {
        let provider = Arc::new(FakeProvider::new());
        let manager = manager_with(provider.clone());
        let (callback, mut rx) = channel_callback();

        let _listener = manager.setup_auth_listener(callback).unwrap();
        // Initial state, nothing local.
        assert!(next(&mut rx).await.is_none());

        provider.emit(AuthEventKind::SignedIn, Some(session("p-1", "tok")));
        let notified = next(&mut rx).await.unwrap();
        assert_eq!(notified.access_token, "tok");
        assert_eq!(manager.auth_data().unwrap().access_token, "tok");

        provider.emit(AuthEventKind::SignedOut, None);
        assert!(next(&mut rx).await.is_none());
        assert!(manager.auth_data().is_none());
    }

    #[tokio::test]
    async fn test_listener_treats_empty_initial_state_with_local_record_as_transient() {
        let provider = Arc::new(FakeProvider::new());
        let manager = manager_with(provider.clone());
        manager.save_auth_data(&session("p-1", "tok"), Some("server-42"));
        let (callback, mut rx) = channel_callback();

        let _listener = manager.setup_auth_listener(callback).unwrap();
        provider.emit(AuthEventKind::TokenRefreshed, Some(session("p-1", "tok-2")));

        // The first callback is the refreshed session, not a null.
        let first = next(&mut rx).await.unwrap();
        assert_eq!(first.access_token, "tok-2");
        assert_eq!(manager.auth_data().unwrap().user_id, "server-42");

        provider.emit(AuthEventKind::UserUpdated, None);
        assert!(next(&mut rx).await.is_none());
        // Only an explicit sign-out clears.
        assert!(manager.auth_data().is_some());
    }

    #[tokio::test]
    async fn test_second_listener_is_rejected_until_first_is_dropped() {
        let provider = Arc::new(FakeProvider::new());
        let manager = manager_with(provider.clone());

        let first = manager.setup_auth_listener(Box::new(|_| {})).unwrap();
        assert!(manager.setup_auth_listener(Box::new(|_| {})).is_none());
        assert_eq!(provider.subscribe_calls(), 1);

        first.unsubscribe();
        let again = manager.setup_auth_listener(Box::new(|_| {}));
        assert!(again.is_some());
        assert_eq!(provider.subscribe_calls(), 2);
    }
}
