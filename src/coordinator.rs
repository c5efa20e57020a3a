//! Installation coordinator
//!
//! Drives sockets through their states:
//!
//! ```text
//! Processing --install--> Checking --check--> Ok
//!      |                      |
//!      +------> Error <-------+
//!      +------> Prompt
//! ```
//!
//! All sockets pending for a tenant are installed together, oldest first,
//! inside one transaction. A business error only undoes the failing socket
//! (the transaction returns to a savepoint taken before it); an
//! infrastructure error abandons the whole transaction so the queue can retry.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::backend::Backend;
//! use socketpm::coordinator::Coordinator;
//! use socketpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::on_disk(Config::load()?);
//! let coordinator = Coordinator::new(backend)?;
//!
//! for (name, status) in coordinator.run("acme")? {
//!     println!("{}: {}", name, status);
//! }
//! # Ok(())
//! # }
//! ```

use crate::archive::Archive;
use crate::backend::Backend;
use crate::config::Limits;
use crate::dependency::{Dependency, DependencyKind};
use crate::download::BundleDownloader;
use crate::error::{StatusInfo, UNHANDLED_ERROR};
use crate::importer::Importer;
use crate::models::{EnvironmentStatus, Installed, Socket, SocketStatus, TenantState};
use crate::processor::{group_dependencies, unref_class, Processor};
use crate::store::Transaction;
use crate::validators;
use crate::{Error, Result};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Dependencies installed so far by one task, across all its sockets.
#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    endpoints: usize,
    dependencies: usize,
}

impl Counts {
    fn add(&mut self, dependencies: &[Dependency], limits: &Limits) -> Result<()> {
        for dependency in dependencies {
            if dependency.kind() == DependencyKind::Endpoint {
                self.endpoints += 1;
            } else {
                self.dependencies += 1;
            }
        }

        if self.dependencies > limits.max_dependencies {
            return Err(Error::processing(format!(
                "Too many dependencies to be installed (max: {}).",
                limits.max_dependencies
            )));
        }
        if self.endpoints > limits.max_endpoints {
            return Err(Error::processing(format!(
                "Too many endpoints defined (max: {}).",
                limits.max_endpoints
            )));
        }
        Ok(())
    }
}

pub struct Coordinator {
    backend: Backend,
    /// Built on first use, on the thread that runs the task
    downloader: OnceLock<BundleDownloader>,
}

impl Coordinator {
    pub fn new(backend: Backend) -> Result<Self> {
        Ok(Self {
            backend,
            downloader: OnceLock::new(),
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn downloader(&self) -> Result<&BundleDownloader> {
        if let Some(downloader) = self.downloader.get() {
            return Ok(downloader);
        }
        let config = &self.backend.config;
        let _ = self
            .downloader
            .set(BundleDownloader::new(&config.download, &config.limits)?);
        self.downloader
            .get()
            .ok_or_else(|| Error::Other("bundle downloader unavailable".to_string()))
    }

    /// Install pending sockets, then check the ones that made it to `Checking`.
    ///
    /// Returns the status each touched socket ended up in.
    pub fn run(&self, tenant: &str) -> Result<Vec<(String, SocketStatus)>> {
        let installed = self.process(tenant)?;
        let checked = self.check(tenant)?;

        let mut statuses = installed;
        for (name, status) in checked {
            match statuses.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = status,
                None => statuses.push((name, status)),
            }
        }
        Ok(statuses)
    }

    /// Install every socket of `tenant` that is in `Processing`.
    pub fn process(&self, tenant: &str) -> Result<Vec<(String, SocketStatus)>> {
        let mut tx = self.backend.begin(tenant)?;
        let drained = tx.state.drain_class_ops();
        if drained > 0 {
            debug!(tenant = %tenant, count = drained, "Applied queued class operations");
        }

        let pending = tx.state.sockets_with_status(SocketStatus::Processing);
        let mut counts = Counts::default();
        let mut statuses = Vec::with_capacity(pending.len());

        for name in pending {
            let savepoint = tx.savepoint();
            let before = counts;

            let status = match self.install_socket(&mut tx, tenant, &name, &mut counts) {
                Ok(()) => SocketStatus::Checking,
                Err(e) if e.is_business() => {
                    tx.rollback_to(savepoint);
                    counts = before;
                    info!(tenant = %tenant, socket = %name, error = %e, "Socket install failed");
                    self.fail_socket(&mut tx, &name, e.status(), e.status_info());
                    e.status()
                }
                Err(e) => {
                    warn!(tenant = %tenant, socket = %name, error = %e, "Install aborted");
                    return Err(e);
                }
            };
            statuses.push((name, status));
        }

        tx.commit()?;
        Ok(statuses)
    }

    fn install_socket(&self, tx: &mut Transaction, tenant: &str, name: &str, counts: &mut Counts) -> Result<()> {
        let limits = &self.backend.config.limits;
        let mut socket = tx
            .state
            .socket(name)
            .cloned()
            .ok_or_else(|| Error::SocketNotFound(name.to_string()))?;

        let bytes = match (&socket.bundle, &socket.install_url) {
            (Some(location), _) => tx.files.read(location)?,
            (None, Some(url)) => self.downloader()?.fetch(&socket.name, url)?,
            (None, None) => return Err(Error::processing("Socket bundle is missing.")),
        };
        let archive = Archive::open(&bytes, limits.max_zip_files)?;

        let trusted = self.backend.quotas.is_trusted(tenant);
        let import = Importer::new(&mut socket, &archive, limits, trusted).import()?;
        counts.add(&import.dependencies, limits)?;

        let partial = import.partial;
        let grouped = group_dependencies(import.dependencies);
        let mut installed = Installed::new();
        {
            let quotas = self.backend.quotas.as_ref();
            let mut processor = Processor::new(tenant, &mut socket, &mut tx.state, &mut tx.files, quotas, limits);

            processor.check(&grouped, partial)?;
            for (kind, deps) in &grouped {
                let data = processor.process(*kind, deps)?;
                if let Some(section) = kind.section() {
                    installed.entry(section.to_string()).or_default().extend(data);
                }
            }
            processor.cleanup(partial)?;
        }

        if partial {
            for (section, data) in installed {
                socket.installed.entry(section).or_default().extend(data);
            }
        } else {
            socket.installed = installed;
        }
        socket.update_hash();

        if let Some(location) = socket.bundle.take() {
            tx.files.delete(&location);
        }
        socket.zip_file_list = None;
        socket.set_status(SocketStatus::Checking, None);
        info!(
            tenant = %tenant,
            socket = %socket.name,
            files = socket.file_list.len(),
            size = socket.size,
            partial,
            "Socket installed"
        );

        tx.state.sockets.insert(socket.name.clone(), socket);
        Ok(())
    }

    /// Park a socket in a terminal state. Its pending bundle is discarded.
    fn fail_socket(&self, tx: &mut Transaction, name: &str, status: SocketStatus, info: StatusInfo) {
        let Some(socket) = tx.state.sockets.get_mut(name) else {
            return;
        };
        if let Some(location) = socket.bundle.take() {
            tx.files.delete(&location);
        }
        socket.zip_file_list = None;
        socket.set_status(status, Some(info));
    }

    /// Validate config overrides and environments of sockets in `Checking`.
    pub fn check(&self, tenant: &str) -> Result<Vec<(String, SocketStatus)>> {
        let mut tx = self.backend.begin(tenant)?;
        let pending = tx.state.sockets_with_status(SocketStatus::Checking);
        let mut statuses = Vec::with_capacity(pending.len());

        for name in pending {
            let outcome = check_socket(&tx.state, &name);
            let Some(socket) = tx.state.sockets.get_mut(&name) else {
                continue;
            };

            match outcome {
                Ok(true) => {
                    socket.set_status(SocketStatus::Ok, None);
                    info!(tenant = %tenant, socket = %name, "Socket ready");
                }
                Ok(false) => {
                    debug!(tenant = %tenant, socket = %name, "Waiting for environment");
                }
                Err(e) => {
                    info!(tenant = %tenant, socket = %name, error = %e, "Socket check failed");
                    socket.set_status(SocketStatus::Error, Some(e.status_info()));
                }
            }
            statuses.push((name, socket.status));
        }

        tx.commit()?;
        Ok(statuses)
    }

    /// Give up on a tenant whose task kept failing: every socket still in
    /// flight ends in `Error` with a generic message.
    pub fn fail_pending(&self, tenant: &str) -> Result<usize> {
        let mut tx = self.backend.begin(tenant)?;
        let mut failed = 0;
        for socket in tx.state.sockets.values_mut().filter(|s| s.is_locked()) {
            if let Some(location) = socket.bundle.take() {
                tx.files.delete(&location);
            }
            socket.set_status(SocketStatus::Error, Some(StatusInfo::message(UNHANDLED_ERROR)));
            failed += 1;
        }
        tx.commit()?;

        if failed > 0 {
            warn!(tenant = %tenant, count = failed, "Marked in-flight sockets as failed");
        }
        Ok(failed)
    }
}

/// `Ok(true)` when the socket is ready, `Ok(false)` when it has to wait.
fn check_socket(state: &TenantState, name: &str) -> Result<bool> {
    let socket = state
        .socket(name)
        .ok_or_else(|| Error::SocketNotFound(name.to_string()))?;

    if let Some(env_name) = &socket.environment {
        let environment = state
            .environments
            .get(env_name)
            .ok_or_else(|| Error::EnvironmentNotFound(env_name.clone()))?;
        match environment.status {
            EnvironmentStatus::Processing => return Ok(false),
            EnvironmentStatus::Error => return Err(Error::EnvironmentFailure),
            EnvironmentStatus::Ok => {}
        }
    }

    validators::validate_socket_config(&socket.config, socket.metadata.get("config"))?;
    Ok(true)
}

/// Drop every object `socket` owns and release its class references.
pub(crate) fn remove_socket_objects(state: &mut TenantState, socket: &Socket) {
    let id = socket.id;
    if let Some(classes) = socket.installed.get("classes") {
        for (class, fields) in classes {
            let fields: Vec<&str> = fields
                .as_object()
                .map(|f| f.keys().map(String::as_str).collect())
                .unwrap_or_default();
            unref_class(state, id, class, fields);
        }
    }

    state.endpoints.retain(|_, e| e.socket != id);
    state.scripts.retain(|s| s.socket != id);
    state.triggers.retain(|t| t.socket != id);
    state.schedules.retain(|s| s.socket != id);
    state.handlers.retain(|h| h.socket != id);
    state.hostings.retain(|_, h| h.socket != Some(id));
}
