//! Shared handles to the installer's collaborators
//!
//! A [`Backend`] bundles the state store, blob storage, tenant locks, quota
//! source and configuration. The request surface and the worker both hold a
//! clone of the same backend.

use crate::config::Config;
use crate::quota::{Quotas, StaticQuotas};
use crate::storage::{DirFileStorage, FileStorage, MemoryFileStorage};
use crate::store::{DirStore, MemoryStore, Store, TenantLocks, Transaction};
use crate::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub files: Arc<dyn FileStorage>,
    pub locks: Arc<TenantLocks>,
    pub quotas: Arc<dyn Quotas>,
    pub config: Arc<Config>,
}

impl Backend {
    pub fn new(config: Config, store: Arc<dyn Store>, files: Arc<dyn FileStorage>, quotas: Arc<dyn Quotas>) -> Self {
        Self {
            store,
            files,
            locks: Arc::new(TenantLocks::new()),
            quotas,
            config: Arc::new(config),
        }
    }

    /// Everything kept in memory; used by tests and dry runs.
    pub fn in_memory(config: Config) -> Self {
        let quotas = Arc::new(StaticQuotas::new(config.quotas.clone()));
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFileStorage::new()),
            quotas,
        )
    }

    /// Tenant documents and stored files under `storage.data_dir`.
    pub fn on_disk(config: Config) -> Self {
        let root = config.storage.data_path();
        let quotas = Arc::new(StaticQuotas::new(config.quotas.clone()));
        Self::new(
            config,
            Arc::new(DirStore::new(&root)),
            Arc::new(DirFileStorage::new(root.join("files"))),
            quotas,
        )
    }

    /// Lock the tenant and open a transaction over its state.
    pub fn begin(&self, tenant: &str) -> Result<Transaction> {
        Transaction::begin(&self.locks, Arc::clone(&self.store), Arc::clone(&self.files), tenant)
    }
}
