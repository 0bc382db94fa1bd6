//! Key-value persistence
//!
//! The host's key-value store is the only durable resource the engine
//! touches. Two adapters ship with the crate: an in-memory map and a
//! directory of JSON files (one file per key).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use fd_lock::RwLock;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::InsightError;

/// Attempts before `update_value` gives up on a contended key
pub const MAX_UPDATE_ATTEMPTS: usize = 32;

/// Async string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, InsightError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), InsightError>;

    async fn remove(&self, key: &str) -> Result<(), InsightError>;

    /// Store `value` only if the current value equals `expected` (`None` means
    /// absent). Returns false and leaves the key untouched otherwise.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, InsightError>;
}

/// Read-modify-write of one key on top of `compare_and_swap`.
///
/// `apply` sees the current raw value and returns the replacement plus a
/// result, or `None` to leave the key as is. It is re-run when another
/// writer changes the key in between.
pub async fn update_value<T, F>(
    kv: &dyn KeyValueStore,
    key: &str,
    mut apply: F,
) -> Result<Option<T>, InsightError>
where
    T: Send,
    F: FnMut(Option<&str>) -> Result<Option<(String, T)>, InsightError> + Send,
{
    for attempt in 0..MAX_UPDATE_ATTEMPTS {
        let current = kv.get(key).await?;
        let Some((value, result)) = apply(current.as_deref())? else {
            return Ok(None);
        };
        if kv.compare_and_swap(key, current.as_deref(), &value).await? {
            return Ok(Some(result));
        }
        debug!(key, attempt, "value changed during update, retrying");
    }
    Err(InsightError::StorageError(format!(
        "gave up updating '{key}' after {MAX_UPDATE_ATTEMPTS} attempts"
    )))
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, InsightError> {
        self.entries
            .lock()
            .map_err(|_| InsightError::StorageError("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, InsightError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), InsightError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), InsightError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, InsightError> {
        let mut entries = self.lock()?;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// Directory-backed store, one `<key>.json` file per key.
///
/// Writers take an exclusive advisory lock on `<key>.lock` and replace the
/// value through a uniquely named temp file, so separate processes sharing
/// the directory never interleave a read-modify-write.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf, InsightError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(InsightError::StorageError(format!("invalid storage key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Run `op` on a blocking thread while holding the key's file lock
    async fn locked<T, F>(&self, key: &str, op: F) -> Result<T, InsightError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Path) -> io::Result<T> + Send + 'static,
    {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir)?;
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path.with_extension("lock"))?;
            let mut lock = RwLock::new(lock_file);
            let _guard = lock.write()?;
            op(&dir, &path)
        })
        .await
        .map_err(|e| InsightError::StorageError(format!("storage task failed: {e}")))?
        .map_err(InsightError::from)
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_atomic(dir: &Path, path: &Path, value: &str) -> io::Result<File> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(value.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, InsightError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), InsightError> {
        let value = value.to_string();
        self.locked(key, move |dir, path| write_atomic(dir, path, &value).map(drop))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), InsightError> {
        self.locked(key, |_, path| match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, InsightError> {
        let expected = expected.map(str::to_string);
        let value = value.to_string();
        self.locked(key, move |dir, path| {
            if read_optional(path)? != expected {
                return Ok(false);
            }
            write_atomic(dir, path, &value)?;
            Ok(true)
        })
        .await
    }
}
