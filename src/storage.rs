//! Blob storage for socket files
//!
//! Every tracked file of a socket (manifest, scripts, helpers) is stored under
//! a key of the form `<tenant>/sockets/<socket key>/<root>_<rand7><ext>`.
//! Writes made during an install go through [`StagedFiles`], which removes
//! them again on rollback and holds back deletions until commit.

use crate::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub trait FileStorage: Send + Sync {
    /// Store `bytes` under `key` and return the location to read them back from.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String>;
    fn read(&self, location: &str) -> Result<Vec<u8>>;
    fn delete(&self, location: &str) -> Result<()>;
    fn exists(&self, location: &str) -> bool;
}

/// Storage key for a socket file.
///
/// Inline manifest sources (`<YAML:...>`) are stored as `inline`.
pub fn storage_key(tenant: &str, socket_key: &str, path: &str) -> String {
    let path = if path.starts_with('<') { "inline" } else { path };
    let (root, ext) = match path.rfind('.') {
        Some(idx) if idx > path.rfind('/').map(|s| s + 1).unwrap_or(0) => path.split_at(idx),
        _ => (path, ""),
    };
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    format!("{}/sockets/{}/{}_{}{}", tenant, socket_key, root, suffix, ext)
}

// ============================================================================
// Backends
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryFileStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Storage("storage lock poisoned".to_string())
}

impl FileStorage for MemoryFileStorage {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let mut files = self.files.lock().map_err(|_| poisoned())?;
        files.insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    fn read(&self, location: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().map_err(|_| poisoned())?;
        files
            .get(location)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("file not found: {}", location)))
    }

    fn delete(&self, location: &str) -> Result<()> {
        let mut files = self.files.lock().map_err(|_| poisoned())?;
        files.remove(location);
        Ok(())
    }

    fn exists(&self, location: &str) -> bool {
        self.files
            .lock()
            .map(|f| f.contains_key(location))
            .unwrap_or(false)
    }
}

/// Files stored under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct DirFileStorage {
    root: PathBuf,
}

impl DirFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf> {
        let relative = Path::new(location);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::Storage(format!("invalid storage location: {}", location)));
        }
        Ok(self.root.join(relative))
    }
}

impl FileStorage for DirFileStorage {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(key.to_string())
    }

    fn read(&self, location: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(location)?)?)
    }

    fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn exists(&self, location: &str) -> bool {
        self.resolve(location).map(|p| p.exists()).unwrap_or(false)
    }
}

// ============================================================================
// Staging
// ============================================================================

/// Unit-of-work view over a [`FileStorage`].
pub struct StagedFiles {
    inner: Arc<dyn FileStorage>,
    written: Vec<String>,
    deferred: Vec<String>,
}

/// Position in a [`StagedFiles`] log to roll back to.
#[derive(Debug, Clone, Copy)]
pub struct StageMark {
    written: usize,
    deferred: usize,
}

impl StagedFiles {
    pub fn new(inner: Arc<dyn FileStorage>) -> Self {
        Self {
            inner,
            written: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn save(&mut self, key: &str, bytes: &[u8]) -> Result<String> {
        let location = self.inner.save(key, bytes)?;
        self.written.push(location.clone());
        Ok(location)
    }

    pub fn read(&self, location: &str) -> Result<Vec<u8>> {
        self.inner.read(location)
    }

    /// Schedule a deletion for commit time.
    pub fn delete(&mut self, location: &str) {
        self.deferred.push(location.to_string());
    }

    pub fn mark(&self) -> StageMark {
        StageMark {
            written: self.written.len(),
            deferred: self.deferred.len(),
        }
    }

    /// Undo everything staged after `mark`.
    pub fn rollback_to(&mut self, mark: StageMark) {
        for location in self.written.drain(mark.written.min(self.written.len())..) {
            if let Err(e) = self.inner.delete(&location) {
                warn!(location = %location, error = %e, "Failed to remove staged file");
            }
        }
        self.deferred.truncate(mark.deferred);
    }

    pub fn rollback(&mut self) {
        self.rollback_to(StageMark {
            written: 0,
            deferred: 0,
        });
    }

    /// Keep staged writes and run deferred deletions.
    pub fn commit(&mut self) {
        self.written.clear();
        for location in self.deferred.drain(..) {
            debug!(location = %location, "Deleting superseded file");
            if let Err(e) = self.inner.delete(&location) {
                warn!(location = %location, error = %e, "Failed to delete superseded file");
            }
        }
    }
}
