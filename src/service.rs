//! Install request surface
//!
//! Validates install, update, config and delete requests, records the socket
//! in the tenant state and hands the tenant to the task queue. Enqueuing is
//! an explicit call made after the state is committed.
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::backend::Backend;
//! use socketpm::service::{BundleSource, InstallRequest, SocketService};
//! use socketpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = SocketService::new(Backend::on_disk(Config::load()?), None);
//! let bundle = std::fs::read("demo.zip")?;
//!
//! let socket = service.install("acme", InstallRequest::new("demo", BundleSource::Upload(bundle)))?;
//! println!("{} is {}", socket.name, socket.status);
//! # Ok(())
//! # }
//! ```

use crate::backend::Backend;
use crate::coordinator::remove_socket_objects;
use crate::models::{InstallConfig, Socket, SocketStatus, TenantState};
use crate::queue::QueueHandle;
use crate::storage::storage_key;
use crate::store::Transaction;
use crate::validators;
use crate::{Error, Result};
use rand::RngCore;
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

/// Where a socket's bundle comes from.
#[derive(Debug, Clone)]
pub enum BundleSource {
    Upload(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub name: String,
    pub source: BundleSource,
    pub config: Map<String, Value>,
    pub zip_file_list: Option<Vec<String>>,
    pub install_config: InstallConfig,
    pub environment: Option<String>,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, source: BundleSource) -> Self {
        Self {
            name: name.into(),
            source,
            config: Map::new(),
            zip_file_list: None,
            install_config: InstallConfig::default(),
            environment: None,
        }
    }
}

/// Changes to an installed socket. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// New bundle; `None` re-fetches from the socket's `install_url`
    pub source: Option<BundleSource>,
    pub config: Option<Map<String, Value>>,
    pub zip_file_list: Option<Vec<String>>,
    pub install_config: Option<InstallConfig>,
    pub environment: Option<String>,
}

pub struct SocketService {
    backend: Backend,
    queue: Option<QueueHandle>,
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|_| Error::InvalidRequest("Enter a valid URL.".to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::InvalidRequest("Enter a valid URL.".to_string()));
    }
    Ok(())
}

fn socket_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Bound environments must exist and be processed.
fn check_environment(state: &TenantState, name: &str) -> Result<()> {
    let environment = state
        .environments
        .get(name)
        .ok_or_else(|| Error::EnvironmentNotFound(name.to_string()))?;
    if !environment.is_ready() {
        return Err(Error::EnvironmentNotReady);
    }
    Ok(())
}

impl SocketService {
    /// Without a queue handle, sockets are only recorded; a worker picks them up later.
    pub fn new(backend: Backend, queue: Option<QueueHandle>) -> Self {
        Self { backend, queue }
    }

    fn enqueue(&self, tenant: &str) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.enqueue(tenant),
            None => Ok(()),
        }
    }

    fn validate_file_list(&self, files: Option<&Vec<String>>) -> Result<()> {
        match files {
            Some(files) => validators::validate_file_list(files, self.backend.config.limits.max_zip_files),
            None => Ok(()),
        }
    }

    /// Store an uploaded bundle or remember the URL to fetch it from.
    fn stage_bundle(&self, tx: &mut Transaction, socket: &mut Socket, source: BundleSource) -> Result<()> {
        if let Some(old) = socket.bundle.take() {
            tx.files.delete(&old);
        }

        match source {
            BundleSource::Upload(bytes) => {
                let max = self.backend.config.limits.max_zip_file_size;
                if bytes.len() as u64 > max {
                    return Err(Error::InvalidRequest(format!(
                        "Bundle is too large (exceeds {}).",
                        crate::importer::format_size(max)
                    )));
                }
                let key = storage_key(tx.tenant(), &socket.key, "bundle.zip");
                socket.bundle = Some(tx.files.save(&key, &bytes)?);
            }
            BundleSource::Url(url) => {
                validate_url(&url)?;
                socket.install_url = Some(url);
            }
        }
        Ok(())
    }

    pub fn install(&self, tenant: &str, request: InstallRequest) -> Result<Socket> {
        validators::validate_socket_name(&request.name)?;
        self.validate_file_list(request.zip_file_list.as_ref())?;

        let mut tx = self.backend.begin(tenant)?;
        if tx.state.sockets.contains_key(&request.name) {
            return Err(Error::InvalidRequest(format!(
                "Socket with name \"{}\" already exists.",
                request.name
            )));
        }
        let limit = self.backend.quotas.sockets_limit(tenant);
        if tx.state.sockets.len() >= limit {
            return Err(Error::SocketCountExceeded(limit));
        }
        if let Some(environment) = &request.environment {
            check_environment(&tx.state, environment)?;
        }

        let id = tx.state.next_id();
        let mut socket = Socket::new(id, &request.name, socket_key(), &self.backend.config.limits.default_version);
        socket.config = request.config;
        socket.zip_file_list = request.zip_file_list;
        socket.install_config = request.install_config;
        socket.environment = request.environment;
        self.stage_bundle(&mut tx, &mut socket, request.source)?;

        tx.state.sockets.insert(socket.name.clone(), socket.clone());
        tx.commit()?;
        info!(tenant = %tenant, socket = %socket.name, "Socket install requested");

        self.enqueue(tenant)?;
        Ok(socket)
    }

    /// Replace the bundle (re-entering `Processing`) or only the config (re-entering `Checking`).
    pub fn update(&self, tenant: &str, name: &str, request: UpdateRequest) -> Result<Socket> {
        self.validate_file_list(request.zip_file_list.as_ref())?;

        let mut tx = self.backend.begin(tenant)?;
        let mut socket = tx
            .state
            .socket(name)
            .cloned()
            .ok_or_else(|| Error::SocketNotFound(name.to_string()))?;
        if socket.is_locked() {
            return Err(Error::SocketLocked);
        }
        if let Some(environment) = &request.environment {
            check_environment(&tx.state, environment)?;
            socket.environment = Some(environment.clone());
        }
        if let Some(install_config) = request.install_config {
            socket.install_config = install_config;
        }

        let config_only = request.source.is_none() && request.config.is_some() && request.zip_file_list.is_none();
        if let Some(config) = request.config {
            socket.config = config;
        }

        if config_only {
            socket.set_status(SocketStatus::Checking, None);
        } else {
            match request.source {
                Some(source) => self.stage_bundle(&mut tx, &mut socket, source)?,
                None if socket.install_url.is_none() => return Err(Error::SocketWithUrlRequired),
                None => {}
            }
            socket.zip_file_list = request.zip_file_list;
            socket.set_status(SocketStatus::Processing, None);
        }

        tx.state.sockets.insert(socket.name.clone(), socket.clone());
        tx.commit()?;
        debug!(tenant = %tenant, socket = %name, status = %socket.status, "Socket update requested");

        self.enqueue(tenant)?;
        Ok(socket)
    }

    pub fn set_config(&self, tenant: &str, name: &str, config: Map<String, Value>) -> Result<Socket> {
        self.update(
            tenant,
            name,
            UpdateRequest {
                config: Some(config),
                ..UpdateRequest::default()
            },
        )
    }

    /// Remove a socket with everything it installed.
    ///
    /// Shared classes are only unreferenced; they disappear once no socket needs them.
    pub fn delete(&self, tenant: &str, name: &str) -> Result<()> {
        let mut tx = self.backend.begin(tenant)?;
        let socket = tx
            .state
            .socket(name)
            .cloned()
            .ok_or_else(|| Error::SocketNotFound(name.to_string()))?;
        if socket.is_locked() {
            return Err(Error::SocketLocked);
        }

        remove_socket_objects(&mut tx.state, &socket);
        for entry in socket.file_list.values() {
            if !entry.file.starts_with('<') {
                tx.files.delete(&entry.file);
            }
        }
        if let Some(location) = &socket.bundle {
            tx.files.delete(location);
        }
        tx.state.sockets.shift_remove(name);

        tx.commit()?;
        info!(tenant = %tenant, socket = %name, "Socket deleted");
        Ok(())
    }

    pub fn get(&self, tenant: &str, name: &str) -> Result<Socket> {
        self.backend
            .store
            .load(tenant)?
            .sockets
            .shift_remove(name)
            .ok_or_else(|| Error::SocketNotFound(name.to_string()))
    }

    pub fn list(&self, tenant: &str) -> Result<Vec<Socket>> {
        Ok(self.backend.store.load(tenant)?.sockets.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build_zip;
    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::models::{Environment, EnvironmentStatus};

    fn service() -> (SocketService, Coordinator) {
        let backend = Backend::in_memory(Config::default());
        let coordinator = Coordinator::new(backend.clone()).unwrap();
        (SocketService::new(backend, None), coordinator)
    }

    fn bundle(files: &[(&str, &str)]) -> BundleSource {
        BundleSource::Upload(build_zip(files.iter().map(|(p, s)| (*p, s.as_bytes().to_vec()))).unwrap())
    }

    #[test]
    fn test_install_records_processing_socket() {
        let (service, _) = service();
        let socket = service
            .install("acme", InstallRequest::new("demo", bundle(&[("socket.yml", "description: x\n")])))
            .unwrap();
        assert_eq!(socket.status, SocketStatus::Processing);
        assert_eq!(socket.key.len(), 32);
        assert!(socket.bundle.is_some());
        assert_eq!(service.list("acme").unwrap().len(), 1);
    }

    #[test]
    fn test_install_validation() {
        let (service, _) = service();
        let source = || bundle(&[("socket.yml", "")]);

        assert!(service.install("acme", InstallRequest::new("Bad Name", source())).is_err());
        assert!(service.install("acme", InstallRequest::new("install", source())).is_err());

        let mut request = InstallRequest::new("demo", source());
        request.zip_file_list = Some((0..31).map(|i| i.to_string()).collect());
        assert_eq!(
            service.install("acme", request).unwrap_err().to_string(),
            "Too many files defined (exceeds 30)."
        );

        let request = InstallRequest::new("demo", BundleSource::Url("ftp://example.com/a.zip".into()));
        assert!(matches!(service.install("acme", request), Err(Error::InvalidRequest(_))));

        service.install("acme", InstallRequest::new("demo", source())).unwrap();
        assert!(service.install("acme", InstallRequest::new("demo", source())).is_err());
    }

    #[test]
    fn test_socket_quota() {
        let mut config = Config::default();
        config.quotas.sockets = 1;
        let service = SocketService::new(Backend::in_memory(config), None);
        service
            .install("acme", InstallRequest::new("a", bundle(&[("socket.yml", "")])))
            .unwrap();
        let err = service
            .install("acme", InstallRequest::new("b", bundle(&[("socket.yml", "")])))
            .unwrap_err();
        assert_eq!(err.to_string(), "Socket count exceeded (1).");
    }

    #[test]
    fn test_update_rules() {
        let (service, coordinator) = service();
        service
            .install("acme", InstallRequest::new("demo", bundle(&[("socket.yml", "description: x\n")])))
            .unwrap();

        let err = service.update("acme", "demo", UpdateRequest::default()).unwrap_err();
        assert!(matches!(err, Error::SocketLocked));

        coordinator.run("acme").unwrap();
        let err = service.update("acme", "demo", UpdateRequest::default()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot update a socket that was not installed from a URL.");

        let mut config = Map::new();
        config.insert("key".into(), Value::from("v"));
        let socket = service.set_config("acme", "demo", config).unwrap();
        assert_eq!(socket.status, SocketStatus::Checking);
        coordinator.run("acme").unwrap();

        let socket = service
            .update(
                "acme",
                "demo",
                UpdateRequest {
                    source: Some(bundle(&[("socket.yml", "description: y\n")])),
                    ..UpdateRequest::default()
                },
            )
            .unwrap();
        assert_eq!(socket.status, SocketStatus::Processing);
        coordinator.run("acme").unwrap();
        let socket = service.get("acme", "demo").unwrap();
        assert_eq!(socket.status, SocketStatus::Ok);
        assert_eq!(socket.description, "y");
        assert_eq!(socket.config["key"], "v");
    }

    #[test]
    fn test_environment_binding() {
        let (service, _) = service();
        let mut request = InstallRequest::new("demo", bundle(&[("socket.yml", "")]));
        request.environment = Some("env1".into());
        assert!(matches!(
            service.install("acme", request.clone()),
            Err(Error::EnvironmentNotFound(_))
        ));

        let mut state = service.backend.store.load("acme").unwrap();
        state.environments.insert(
            "env1".into(),
            Environment {
                id: 1,
                name: "env1".into(),
                description: String::new(),
                status: EnvironmentStatus::Processing,
                status_info: None,
                checksum: None,
                archive: None,
                image: None,
                created_at: chrono::Utc::now(),
            },
        );
        service.backend.store.save("acme", &state).unwrap();

        let err = service.install("acme", request).unwrap_err();
        assert_eq!(err.to_string(), "Socket environment is still processing.");
    }

    #[test]
    fn test_delete_socket_releases_objects() {
        let (service, coordinator) = service();
        let manifest = "endpoints:\n  hello:\n    file: hello.js\nclasses:\n  c1:\n    - name: f1\n      type: string\nhosting:\n  site:\n    cname: my.example.com\n";
        service
            .install(
                "acme",
                InstallRequest::new("s1", bundle(&[("socket.yml", manifest), ("hello.js", "return 1")])),
            )
            .unwrap();
        service
            .install(
                "acme",
                InstallRequest::new("s2", bundle(&[("socket.yml", "classes:\n  c1:\n    - name: f1\n      type: string\n")])),
            )
            .unwrap();
        coordinator.run("acme").unwrap();

        service.delete("acme", "s1").unwrap();
        let state = service.backend.store.load("acme").unwrap();
        assert!(!state.sockets.contains_key("s1"));
        assert!(state.endpoints.is_empty());
        assert!(state.scripts.is_empty());
        assert!(state.hostings.is_empty());
        assert_eq!(state.classes["c1"].refs.managed_by, vec![state.sockets["s2"].id]);

        service.delete("acme", "s2").unwrap();
        let state = service.backend.store.load("acme").unwrap();
        assert!(state.classes.is_empty());
        assert!(matches!(service.delete("acme", "s2"), Err(Error::SocketNotFound(_))));
    }
}
