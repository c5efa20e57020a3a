//! Shared socket environments
//!
//! An environment is a gzipped tar archive that sockets can run against. It
//! is uploaded once, checked and repacked into a normalized image, and only
//! then can sockets bind to it. A socket bound to an environment that is
//! still processing waits in `Checking`; one bound to a failed environment
//! ends in `Error`.

use crate::backend::Backend;
use crate::checksum;
use crate::error::StatusInfo;
use crate::models::{Environment, EnvironmentStatus};
use crate::validators;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Read;
use std::path::{Component, Path};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{info, warn};

pub struct EnvironmentService {
    backend: Backend,
}

fn corrupt(reason: impl std::fmt::Display) -> Error {
    Error::processing(format!("Environment archive is corrupted: {}.", reason))
}

fn is_safe_path(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Check an uploaded archive and repack it with normalized headers.
///
/// Only regular files and directories with relative paths are accepted.
pub fn build_image(archive: &[u8]) -> Result<Vec<u8>> {
    let mut source = Archive::new(GzDecoder::new(archive));
    let mut image = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut count = 0usize;

    for entry in source.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        if !is_safe_path(&path) {
            return Err(Error::processing(format!(
                "Environment archive contains an unsafe path: \"{}\".",
                path.display()
            )));
        }

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        match entry.header().entry_type() {
            EntryType::Directory => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                image.append_data(&mut header, &path, std::io::empty())?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(corrupt)?;
                let executable = entry.header().mode().map(|m| m & 0o111 != 0).unwrap_or(false);
                header.set_mode(if executable { 0o755 } else { 0o644 });
                header.set_size(data.len() as u64);
                header.set_cksum();
                image.append_data(&mut header, &path, data.as_slice())?;
                count += 1;
            }
            other => {
                return Err(Error::processing(format!(
                    "Environment archive contains an unsupported entry: \"{}\" ({:?}).",
                    path.display(),
                    other
                )));
            }
        }
    }

    if count == 0 {
        return Err(Error::processing("Environment archive is empty."));
    }
    Ok(image.into_inner()?.finish()?)
}

impl EnvironmentService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Register an archive from disk. It stays in `Processing` until [`process`](Self::process) runs.
    pub fn add(
        &self,
        tenant: &str,
        name: &str,
        description: &str,
        archive: &Path,
        expected_checksum: Option<&str>,
    ) -> Result<Environment> {
        validators::validate_socket_name(name)?;
        if let Some(expected) = expected_checksum {
            checksum::verify_file(archive, expected)?;
        }
        let digest = checksum::file_digest(archive)?;
        let bytes = fs::read(archive)?;

        let mut tx = self.backend.begin(tenant)?;
        if tx.state.environments.contains_key(name) {
            return Err(Error::InvalidRequest(format!(
                "Environment with name \"{}\" already exists.",
                name
            )));
        }

        let location = tx
            .files
            .save(&format!("{}/environments/{}/archive.tar.gz", tenant, name), &bytes)?;
        let environment = Environment {
            id: tx.state.next_id(),
            name: name.to_string(),
            description: description.to_string(),
            status: EnvironmentStatus::Processing,
            status_info: None,
            checksum: Some(digest),
            archive: Some(location),
            image: None,
            created_at: chrono::Utc::now(),
        };
        tx.state.environments.insert(name.to_string(), environment.clone());
        tx.commit()?;

        info!(tenant = %tenant, environment = %name, "Environment added");
        Ok(environment)
    }

    /// Turn a processing environment's archive into its image.
    ///
    /// A bad archive leaves the environment in `Error`; storage failures are returned.
    pub fn process(&self, tenant: &str, name: &str) -> Result<Environment> {
        let mut tx = self.backend.begin(tenant)?;
        let mut environment = tx
            .state
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EnvironmentNotFound(name.to_string()))?;
        if environment.status != EnvironmentStatus::Processing {
            return Ok(environment);
        }

        let location = environment
            .archive
            .clone()
            .ok_or_else(|| Error::Storage(format!("environment \"{}\" has no archive", name)))?;
        let archive = tx.files.read(&location)?;

        match build_image(&archive) {
            Ok(image) => {
                let short = environment.checksum.as_deref().unwrap_or_default();
                let key = format!(
                    "{}/environments/{}/image_{}.tar.gz",
                    tenant,
                    name,
                    &short[..short.len().min(12)]
                );
                environment.image = Some(tx.files.save(&key, &image)?);
                environment.status = EnvironmentStatus::Ok;
                environment.status_info = None;
                info!(tenant = %tenant, environment = %name, "Environment ready");
            }
            Err(e) if e.is_business() => {
                warn!(tenant = %tenant, environment = %name, error = %e, "Environment failed");
                environment.status = EnvironmentStatus::Error;
                environment.status_info = Some(StatusInfo::message(e.to_string()));
            }
            Err(e) => return Err(e),
        }

        tx.files.delete(&location);
        environment.archive = None;
        tx.state.environments.insert(name.to_string(), environment.clone());
        tx.commit()?;
        Ok(environment)
    }

    /// Process every environment still waiting on its archive.
    pub fn process_pending(&self, tenant: &str) -> Result<Vec<(String, EnvironmentStatus)>> {
        let pending: Vec<String> = self
            .backend
            .store
            .load(tenant)?
            .environments
            .values()
            .filter(|e| e.status == EnvironmentStatus::Processing)
            .map(|e| e.name.clone())
            .collect();

        let mut statuses = Vec::with_capacity(pending.len());
        for name in pending {
            let environment = self.process(tenant, &name)?;
            statuses.push((name, environment.status));
        }
        Ok(statuses)
    }

    pub fn list(&self, tenant: &str) -> Result<Vec<Environment>> {
        Ok(self.backend.store.load(tenant)?.environments.into_values().collect())
    }

    /// Environments bound to a socket cannot be deleted.
    pub fn delete(&self, tenant: &str, name: &str) -> Result<()> {
        let mut tx = self.backend.begin(tenant)?;
        let environment = tx
            .state
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| Error::EnvironmentNotFound(name.to_string()))?;

        if let Some(socket) = tx
            .state
            .sockets
            .values()
            .find(|s| s.environment.as_deref() == Some(name))
        {
            return Err(Error::InvalidRequest(format!(
                "Environment \"{}\" is used by socket \"{}\".",
                name, socket.name
            )));
        }

        for location in environment.archive.iter().chain(environment.image.iter()) {
            tx.files.delete(location);
        }
        tx.state.environments.shift_remove(name);
        tx.commit()?;
        info!(tenant = %tenant, environment = %name, "Environment deleted");
        Ok(())
    }
}
