use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use heroes_sync_core::{KeyValueStore, SyncError};
use tracing::debug;

type Entries = BTreeMap<String, String>;

/// Key-value store persisted as a single JSON object on disk.
///
/// Every mutation holds an exclusive advisory lock on a sidecar `.lock` file and replaces
/// the data file via temp file + rename, so concurrent processes never observe a torn
/// write.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/heroes-sync/local-storage.json`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("heroes-sync")
            .join("local-storage.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn read_entries(&self) -> Result<Entries, SyncError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => {
                return Err(SyncError::Transport(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if text.trim().is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            SyncError::ShapeMismatch(format!("Corrupt store {}: {}", self.path.display(), e))
        })
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), SyncError> {
        let text = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, text).map_err(|e| {
            SyncError::Transport(format!(
                "Failed to write temp file {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            SyncError::Transport(format!(
                "Failed to rename temp file to {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, SyncError>) -> Result<T, SyncError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    SyncError::Transport(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let lock_file: File = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| SyncError::Transport(format!("Failed to open lock file: {}", e)))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| SyncError::Transport(format!("Failed to lock store: {}", e)))?;

        let result = f();
        let _ = lock_file.unlock();
        result
    }

    fn mutate(&self, f: impl FnOnce(&mut Entries)) -> Result<(), SyncError> {
        self.with_lock(|| {
            let mut entries = self.read_entries()?;
            f(&mut entries);
            self.write_entries(&entries)
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })?;
        debug!("Stored key {} in {}", key, self.path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FileKeyValueStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(temp_dir.path().join("nested").join("store.json"));
        (store, temp_dir)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (store, _temp_dir) = setup();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _temp_dir) = setup();

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_persists_across_instances() {
        let (store, _temp_dir) = setup();
        store.set("key", "value").unwrap();

        let reopened = FileKeyValueStore::new(store.path().to_path_buf());
        assert_eq!(reopened.get("key").unwrap().as_deref(), Some("value"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_shape_mismatch() {
        let (store, _temp_dir) = setup();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json").unwrap();

        assert!(matches!(store.get("k"), Err(SyncError::ShapeMismatch(_))));
    }
}
