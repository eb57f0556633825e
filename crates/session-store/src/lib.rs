//! Local persistence for the one credential record kept per device.
//!
//! - [`KeyValueStorage`]: the backend seam (file-backed or in-memory)
//! - [`SessionStore`]: the soft-failing facade over a single fixed key,
//!   holding one [`AuthData`] JSON record

mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{AuthData, SessionStore, AUTH_DATA_TTL_DAYS};
pub use traits::KeyValueStorage;

use std::path::Path;
use thiserror::Error;

/// Error type for storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create a session store persisted to the JSON file at `path`.
pub fn create_file_session_store(path: impl AsRef<Path>) -> SessionStore {
    SessionStore::new(Box::new(FileStorage::new(path)))
}

/// Create a session store that lives only in memory.
pub fn create_memory_session_store() -> SessionStore {
    SessionStore::new(Box::new(MemoryStorage::new()))
}
