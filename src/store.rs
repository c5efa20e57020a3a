//! Per-tenant state store and transactions
//!
//! A tenant's [`TenantState`] is loaded, mutated and saved as one document.
//! [`Transaction`] ties that together with the tenant lock and the staged file
//! writes: nothing is visible to other readers until [`Transaction::commit`],
//! and dropping a transaction without committing undoes its file writes.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::storage::MemoryFileStorage;
//! use socketpm::store::{MemoryStore, TenantLocks, Transaction};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let files = Arc::new(MemoryFileStorage::new());
//! let locks = Arc::new(TenantLocks::new());
//!
//! let mut tx = Transaction::begin(&locks, store, files, "acme")?;
//! let id = tx.state.next_id();
//! println!("allocated id {}", id);
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

use crate::models::TenantState;
use crate::storage::{FileStorage, StageMark, StagedFiles};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

pub trait Store: Send + Sync {
    /// Load a tenant's state; unknown tenants start empty.
    fn load(&self, tenant: &str) -> Result<TenantState>;
    fn save(&self, tenant: &str, state: &TenantState) -> Result<()>;
}

fn poisoned() -> Error {
    Error::Storage("store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tenants: Mutex<HashMap<String, TenantState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self, tenant: &str) -> Result<TenantState> {
        let tenants = self.tenants.lock().map_err(|_| poisoned())?;
        Ok(tenants.get(tenant).cloned().unwrap_or_default())
    }

    fn save(&self, tenant: &str, state: &TenantState) -> Result<()> {
        let mut tenants = self.tenants.lock().map_err(|_| poisoned())?;
        tenants.insert(tenant.to_string(), state.clone());
        Ok(())
    }
}

/// One JSON document per tenant under `<root>/tenants/<tenant>.json`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, tenant: &str) -> Result<PathBuf> {
        let valid = !tenant.is_empty()
            && tenant
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidRequest(format!("invalid tenant name: {}", tenant)));
        }
        Ok(self.root.join("tenants").join(format!("{}.json", tenant)))
    }

    /// Tenants with a saved state document.
    pub fn tenants(&self) -> Result<Vec<String>> {
        let dir = self.root.join("tenants");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut tenants = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tenants.push(stem.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

impl Store for DirStore {
    fn load(&self, tenant: &str) -> Result<TenantState> {
        let path = self.path(tenant)?;
        if !path.exists() {
            return Ok(TenantState::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, tenant: &str, state: &TenantState) -> Result<()> {
        let path = self.path(tenant)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so readers never see a half-written document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ============================================================================
// Locks
// ============================================================================

/// Tenant-scoped advisory locks.
#[derive(Debug, Default)]
pub struct TenantLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the tenant's lock is free, then take it.
    pub fn acquire(self: &Arc<Self>, tenant: &str) -> Result<TenantGuard> {
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while held.contains(tenant) {
            held = self.released.wait(held).map_err(|_| poisoned())?;
        }
        held.insert(tenant.to_string());

        Ok(TenantGuard {
            locks: Arc::clone(self),
            tenant: tenant.to_string(),
        })
    }

    pub fn is_locked(&self, tenant: &str) -> bool {
        self.held.lock().map(|h| h.contains(tenant)).unwrap_or(false)
    }
}

/// Releases the tenant lock on drop.
#[derive(Debug)]
pub struct TenantGuard {
    locks: Arc<TenantLocks>,
    tenant: String,
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            held.remove(&self.tenant);
        }
        self.locks.released.notify_all();
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Working copy of a tenant's state plus its staged file writes.
pub struct Transaction {
    _guard: TenantGuard,
    store: Arc<dyn Store>,
    tenant: String,
    pub state: TenantState,
    pub files: StagedFiles,
    committed: bool,
}

/// Snapshot to return to when one socket of a batch fails.
pub struct Savepoint {
    state: TenantState,
    files: StageMark,
}

impl Transaction {
    /// Take the tenant lock and load a working copy of its state.
    pub fn begin(
        locks: &Arc<TenantLocks>,
        store: Arc<dyn Store>,
        files: Arc<dyn FileStorage>,
        tenant: &str,
    ) -> Result<Self> {
        let guard = locks.acquire(tenant)?;
        let state = store.load(tenant)?;
        debug!(tenant = %tenant, "Transaction started");

        Ok(Self {
            _guard: guard,
            store,
            tenant: tenant.to_string(),
            state,
            files: StagedFiles::new(files),
            committed: false,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            state: self.state.clone(),
            files: self.files.mark(),
        }
    }

    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.state = savepoint.state;
        self.files.rollback_to(savepoint.files);
    }

    /// Persist the working copy, then run deferred file deletions.
    pub fn commit(mut self) -> Result<()> {
        self.store.save(&self.tenant, &self.state)?;
        self.files.commit();
        self.committed = true;
        debug!(tenant = %self.tenant, "Transaction committed");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed {
            debug!(tenant = %self.tenant, "Transaction rolled back");
            self.files.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Socket;
    use crate::storage::MemoryFileStorage;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (Arc<TenantLocks>, Arc<MemoryStore>, Arc<MemoryFileStorage>) {
        (
            Arc::new(TenantLocks::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFileStorage::new()),
        )
    }

    #[test]
    fn test_commit_persists_state() {
        let (locks, store, files) = setup();
        let mut tx = Transaction::begin(&locks, store.clone(), files.clone(), "acme").unwrap();
        tx.state.sockets.insert("demo".into(), Socket::new(1, "demo", "k", "0.1"));
        tx.files.save("acme/sockets/k/a.js", b"1").unwrap();
        tx.commit().unwrap();

        assert!(store.load("acme").unwrap().sockets.contains_key("demo"));
        assert!(files.exists("acme/sockets/k/a.js"));
        assert!(!locks.is_locked("acme"));
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let (locks, store, files) = setup();
        {
            let mut tx = Transaction::begin(&locks, store.clone(), files.clone(), "acme").unwrap();
            tx.state.next_id();
            tx.files.save("acme/sockets/k/a.js", b"1").unwrap();
        }
        assert_eq!(store.load("acme").unwrap().next_id, 0);
        assert!(files.is_empty());
    }

    #[test]
    fn test_savepoint_restores_state_and_files() {
        let (locks, store, files) = setup();
        let mut tx = Transaction::begin(&locks, store, files.clone(), "acme").unwrap();
        tx.files.save("keep", b"1").unwrap();
        let sp = tx.savepoint();
        tx.state.next_id();
        tx.files.save("drop", b"2").unwrap();
        tx.rollback_to(sp);

        assert_eq!(tx.state.next_id, 0);
        assert!(files.exists("keep"));
        assert!(!files.exists("drop"));
    }

    #[test]
    fn test_lock_serializes_tenants() {
        let (locks, _, _) = setup();
        let guard = locks.acquire("acme").unwrap();
        assert!(locks.is_locked("acme"));
        assert!(!locks.is_locked("other"));

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.acquire("acme").unwrap();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
        assert!(!locks.is_locked("acme"));
    }

    #[test]
    fn test_dir_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        assert!(store.load("acme").unwrap().sockets.is_empty());

        let mut state = TenantState::default();
        state.sockets.insert("demo".into(), Socket::new(1, "demo", "k", "0.1"));
        store.save("acme", &state).unwrap();

        let loaded = store.load("acme").unwrap();
        assert_eq!(loaded.sockets["demo"].name, "demo");
        assert_eq!(store.tenants().unwrap(), vec!["acme".to_string()]);
        assert!(store.load("../etc").is_err());
    }
}
