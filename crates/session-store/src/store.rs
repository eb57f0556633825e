//! The persisted credential record and its soft-failing store.

use crate::{KeyValueStorage, StorageKeys};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifetime of a saved record, counted from the moment it is written.
pub const AUTH_DATA_TTL_DAYS: i64 = 30;

/// The one credential record kept per device.
///
/// `expires_at` is a local deadline in epoch milliseconds. It is independent
/// of the identity provider's own token expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Set once `user_id` came from the backend rather than the provider.
    #[serde(default)]
    pub user_id_confirmed: bool,
}

impl AuthData {
    /// Deadline for a record written at `now`.
    pub fn deadline_from(now: DateTime<Utc>) -> i64 {
        (now + Duration::days(AUTH_DATA_TTL_DAYS)).timestamp_millis()
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp_millis()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Facade over a storage backend holding a single [`AuthData`] record.
///
/// Nothing here returns an error. Backend failures are logged and reported
/// as absence; a record that no longer parses is deleted.
pub struct SessionStore {
    storage: Box<dyn KeyValueStorage>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> Option<AuthData> {
        let raw = match self.storage.get(StorageKeys::AUTH_DATA) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "Failed to read auth data, treating as absent");
                self.clear();
                return None;
            }
        };

        match serde_json::from_str::<AuthData>(&raw) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(error = %err, len = raw.len(), "Stored auth data is corrupt, clearing it");
                self.clear();
                None
            }
        }
    }

    /// Overwrite the whole record.
    pub fn set(&self, data: &AuthData) {
        let json = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "Failed to encode auth data");
                return;
            }
        };

        match self.storage.set(StorageKeys::AUTH_DATA, &json) {
            Ok(()) => debug!(user_id = %data.user_id, expires_at = data.expires_at, "Auth data saved"),
            Err(err) => warn!(error = %err, "Failed to persist auth data"),
        }
    }

    pub fn clear(&self) {
        match self.storage.delete(StorageKeys::AUTH_DATA) {
            Ok(true) => debug!("Auth data cleared"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, "Failed to clear auth data"),
        }
    }

    /// Current access token, if a record exists.
    pub fn access_token(&self) -> Option<String> {
        self.get().map(|data| data.access_token)
    }

    pub fn has_record(&self) -> bool {
        self.get().is_some()
    }
}
