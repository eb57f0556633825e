//! The identity provider seam.

use crate::error::ProviderResult;
use crate::types::{AuthChangeEvent, OAuthProvider, OAuthStart, Session, SessionTokens};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// A remote identity/OAuth backend.
///
/// Implementations own the live session in memory. Nothing here persists
/// anything; that is [`crate::AuthManager`]'s job.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve configuration. Concurrent first callers share one attempt.
    async fn initialize(&self) -> ProviderResult<()>;

    /// The current session, or `None` when absent or past its expiry.
    async fn get_session(&self) -> ProviderResult<Option<Session>>;

    /// Begin an OAuth sign-in and return the URL to visit.
    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_url: &str,
    ) -> ProviderResult<OAuthStart>;

    /// Trade an authorization code from the callback for a session.
    async fn exchange_code_for_session(&self, code: &str) -> ProviderResult<Session>;

    /// Adopt externally issued tokens after validating them.
    async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<Session>;

    /// Explicitly refresh. Uses the in-memory refresh token, else `fallback_refresh_token`.
    async fn refresh_session(&self, fallback_refresh_token: Option<&str>)
        -> ProviderResult<Session>;

    /// End the session. Subscribers see `SignedOut` even if the remote call fails.
    async fn sign_out(&self) -> ProviderResult<()>;

    /// Subscribe to state changes. Dropping the subscription unsubscribes.
    fn subscribe(&self) -> AuthSubscription;
}

/// A live subscription to provider state changes.
///
/// Yields the `InitialSession` event first, then every change broadcast
/// after the subscription was created.
pub struct AuthSubscription {
    initial: Option<AuthChangeEvent>,
    receiver: broadcast::Receiver<AuthChangeEvent>,
}

impl AuthSubscription {
    pub fn new(initial: AuthChangeEvent, receiver: broadcast::Receiver<AuthChangeEvent>) -> Self {
        Self {
            initial: Some(initial),
            receiver,
        }
    }

    /// Next event, or `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<AuthChangeEvent> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth subscription lagged, dropping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthEventKind;

    #[tokio::test]
    async fn test_subscription_yields_initial_event_first() {
        let (tx, rx) = broadcast::channel(8);
        let mut subscription =
            AuthSubscription::new(AuthChangeEvent::new(AuthEventKind::InitialSession, None), rx);

        tx.send(AuthChangeEvent::new(AuthEventKind::SignedOut, None))
            .unwrap();

        let first = subscription.recv().await.unwrap();
        assert_eq!(first.kind, AuthEventKind::InitialSession);
        let second = subscription.recv().await.unwrap();
        assert_eq!(second.kind, AuthEventKind::SignedOut);

        drop(tx);
        assert!(subscription.recv().await.is_none());
    }
}
