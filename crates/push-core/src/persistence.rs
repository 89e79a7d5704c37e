//! Whole-document persistence backends.
//!
//! The push store is always read and written as one document under a fixed
//! key. Backends are synchronous: a `write` returns only once the document
//! is durable.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O failure on a backing file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key cannot be mapped to storage.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Synchronous whole-document storage.
pub trait Persistence: Send + Sync {
    /// Read the document stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the document stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), PersistenceError>;
}

/// File-backed persistence, one JSON file per key.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Create a backend rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Persistence for FilePersistence {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        let final_path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!("{key}.json.tmp"));

        fs::create_dir_all(&self.dir).map_err(|source| io_err(&self.dir, source))?;

        let mut file = File::create(&tmp_path).map_err(|source| io_err(&tmp_path, source))?;
        file.write_all(bytes).map_err(|source| io_err(&tmp_path, source))?;
        file.sync_all().map_err(|source| io_err(&tmp_path, source))?;

        fs::rename(&tmp_path, &final_path).map_err(|source| io_err(&final_path, source))?;
        fsync_dir(&self.dir)?;

        trace!(path = %final_path.display(), bytes = bytes.len(), "Wrote document");
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<(), PersistenceError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|source| io_err(dir, source))
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<(), PersistenceError> {
    Ok(())
}

/// In-process persistence.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersistence {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with one document.
    #[must_use]
    pub fn with_document(key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let persistence = Self::new();
        persistence.entries.lock().insert(key.into(), bytes.into());
        persistence
    }

    /// Get a copy of the document stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }
}

impl Persistence for MemoryPersistence {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.get(key))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), PersistenceError> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
