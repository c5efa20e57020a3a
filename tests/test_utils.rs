//! Test utilities shared by the socketpm integration tests.
//!
//! Provides an on-disk tenant backed by a temporary directory, in-memory
//! bundle builders, and a CLI command wired to the same directories.

#![allow(dead_code)]

use socketpm::backend::Backend;
use socketpm::coordinator::Coordinator;
use socketpm::service::{BundleSource, InstallRequest, SocketService, UpdateRequest};
use socketpm::{Config, Socket, SocketStatus, TenantState};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TENANT: &str = "acme";

/// Build a zip bundle from `(path, content)` pairs.
pub fn bundle(files: &[(&str, &str)]) -> Vec<u8> {
    socketpm::archive::build_zip(files.iter().map(|(p, c)| (*p, c.as_bytes().to_vec())))
        .expect("Failed to build bundle")
}

/// Isolated on-disk installer
pub struct TestTenant {
    pub temp_dir: TempDir,
    pub backend: Backend,
    pub service: SocketService,
    pub coordinator: Coordinator,
}

impl TestTenant {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.storage.data_dir = temp_dir.path().join("data").display().to_string();

        let backend = Backend::on_disk(config);
        let coordinator = Coordinator::new(backend.clone()).expect("Failed to create coordinator");
        let service = SocketService::new(backend.clone(), None);
        Self {
            temp_dir,
            backend,
            service,
            coordinator,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    /// Install (or replace the bundle of) `name`, run the tasks and return the socket.
    pub fn install(&self, name: &str, files: &[(&str, &str)]) -> Socket {
        let source = BundleSource::Upload(bundle(files));
        let exists = self.service.get(TENANT, name).is_ok();
        if exists {
            let request = UpdateRequest {
                source: Some(source),
                ..UpdateRequest::default()
            };
            self.service.update(TENANT, name, request).expect("Update request failed");
        } else {
            self.service
                .install(TENANT, InstallRequest::new(name, source))
                .expect("Install request failed");
        }
        self.run();
        self.socket(name)
    }

    pub fn run(&self) -> Vec<(String, SocketStatus)> {
        self.coordinator.run(TENANT).expect("Task failed")
    }

    pub fn socket(&self, name: &str) -> Socket {
        self.service.get(TENANT, name).expect("Socket not found")
    }

    pub fn state(&self) -> TenantState {
        self.backend.store.load(TENANT).expect("Failed to load state")
    }
}

/// Paths a CLI invocation needs to share the test's store.
pub fn cli_env(dir: &Path) -> [(&'static str, PathBuf); 2] {
    [
        ("SOCKETPM_CONFIG_DIR", dir.join("config")),
        ("SOCKETPM_DATA_DIR", dir.join("data")),
    ]
}
