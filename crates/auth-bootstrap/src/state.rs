//! Observable auth state.

use crate::auth_fsm::AuthPhase;
use planner_auth::Session;
use serde::{Deserialize, Serialize};

/// Body of `GET /api/auth/user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The backend's stable user id.
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What the UI renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub user: Option<UserProfile>,
    pub session: Option<Session>,
    pub is_loading: bool,
    pub is_initialized: bool,
    /// Session, profile and no error, all at once.
    pub is_authenticated: bool,
    pub error: Option<String>,
    pub phase: AuthPhase,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            session: None,
            is_loading: true,
            is_initialized: false,
            is_authenticated: false,
            error: None,
            phase: AuthPhase::Uninitialized,
        }
    }
}

impl AuthSnapshot {
    pub(crate) fn recompute(&mut self) {
        self.is_authenticated = self.session.is_some() && self.user.is_some() && self.error.is_none();
    }
}
