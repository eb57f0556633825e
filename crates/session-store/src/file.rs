//! File-backed storage backend.
//!
//! All keys live in one JSON object on disk. Writes go to a sibling temp
//! file that is renamed over the original, so a crash mid-write leaves the
//! previous contents intact.

use crate::{KeyValueStorage, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

type Entries = BTreeMap<String, String>;

/// JSON-file storage.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(err) => return Err(err.into()),
        };

        if content.trim().is_empty() {
            return Ok(Entries::new());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// Like `read_entries`, but a corrupt file is discarded so writes can
    /// proceed. The flag reports whether that happened.
    fn read_entries_for_write(&self) -> StorageResult<(Entries, bool)> {
        match self.read_entries() {
            Ok(entries) => Ok((entries, false)),
            Err(StorageError::Encoding(reason)) => {
                warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Storage file is corrupt, starting from an empty store"
                );
                Ok((Entries::new(), true))
            }
            Err(err) => Err(err),
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)?;
        restrict_permissions(&tmp_path);
        std::fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), keys = entries.len(), "Storage file written");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode(0o600);
    if let Err(err) = std::fs::set_permissions(path, permissions) {
        warn!(path = %path.display(), error = %err, "Failed to tighten storage file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

impl KeyValueStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let (mut entries, _) = self.read_entries_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.lock.lock();
        let (mut entries, discarded) = self.read_entries_for_write()?;
        let removed = entries.remove(key).is_some();
        if removed || discarded {
            self.write_entries(&entries)?;
        }
        Ok(removed)
    }
}
