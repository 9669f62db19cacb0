//! File-backed session storage.
//!
//! All keys live in a single JSON document. Every batch rewrites the document
//! through a temporary file which is synced and then renamed over the target,
//! so a crash leaves either the old or the new document on disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::{StorageError, StorageResult};
use super::traits::{KeyValueStore, KeyWrite};

/// Key-value store persisted as a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is treated as an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| map_io_err(&err))?;
        }
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StorageError::Serialization(err.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(map_io_err(&err)),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: String) -> StorageResult<Option<String>> {
        let guard = self
            .values
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        Ok(guard.get(&key).cloned())
    }

    fn write_batch(&self, writes: Vec<KeyWrite>) -> StorageResult<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        let mut next = guard.clone();
        for write in writes {
            match write.value {
                Some(value) => next.insert(write.key, value),
                None => next.remove(&write.key),
            };
        }
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        write_atomic(&self.path, &bytes)?;
        *guard = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp_path = PathBuf::from(format!("{}.tmp", path.to_string_lossy()));
    let mut file = File::create(&tmp_path).map_err(|err| map_io_err(&err))?;
    file.write_all(bytes).map_err(|err| map_io_err(&err))?;
    file.sync_all().map_err(|err| map_io_err(&err))?;
    fs::rename(&tmp_path, path).map_err(|err| map_io_err(&err))
}

fn map_io_err(err: &std::io::Error) -> StorageError {
    StorageError::Io(err.to_string())
}
