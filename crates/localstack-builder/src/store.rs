//! Release store
//!
//! Key/value blob store with path-like keys. The only backend is a local
//! directory (the host release dir, mounted at `/release` in the
//! container). Writes go to a temporary sibling and are renamed into place
//! so readers never see a half-written object.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Release store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Blob store with path-like keys
pub trait BlobStore {
    /// Read an object; Ok(None) if absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write an object atomically
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Copy a local file into the store atomically
    fn put_file(&self, key: &str, source: &Path) -> Result<(), StoreError>;

    /// Copy an object out of the store
    fn get_file(&self, key: &str, dest: &Path) -> Result<bool, StoreError>;

    /// Keys directly under a directory-like prefix, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove an object; absent objects are not an error
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether an object exists
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Read an object as trimmed UTF-8; empty objects read as None
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Write a string followed by a newline
    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put(key, format!("{}\n", value).as_bytes())
    }
}

/// Directory-backed blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn io_err(key: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            key: key.to_string(),
            source,
        }
    }

    /// Write via a temporary sibling and rename
    fn write_atomic<F>(&self, key: &str, write: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Self::io_err(key))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

        if let Err(e) = write(&tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            });
        }
        fs::rename(&tmp, &path).map_err(Self::io_err(key))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(key, |tmp| fs::write(tmp, data))
    }

    fn put_file(&self, key: &str, source: &Path) -> Result<(), StoreError> {
        self.write_atomic(key, |tmp| fs::copy(source, tmp).map(|_| ()))
    }

    fn get_file(&self, key: &str, dest: &Path) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(Self::io_err(key))?;
        }
        fs::copy(&path, dest).map_err(Self::io_err(key))?;
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.path_for(prefix)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    key: prefix.to_string(),
                    source: e,
                })
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_err(prefix))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.path().is_file() {
                keys.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}
