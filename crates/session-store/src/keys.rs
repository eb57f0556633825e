//! Storage key constants.

/// Storage keys used by the auth layer.
pub struct StorageKeys;

impl StorageKeys {
    /// The single persisted credential record (JSON).
    pub const AUTH_DATA: &'static str = "planner_auth_data";
}
