//! Dependency processors
//!
//! A [`Processor`] materializes the dependencies of one socket into platform
//! objects inside a tenant transaction. Each dependency kind has three steps,
//! dispatched statically over [`DependencyKind`]:
//!
//! - **check**: pre-flight validation over all dependencies of the kind, run
//!   for every kind before anything is mutated
//! - **process**: create or update the object for one dependency and return
//!   what was installed for the socket's `installed` map
//! - **cleanup**: remove objects of the kind the socket owned before but the
//!   current install did not produce
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::processor::{group_dependencies, Processor};
//! # use socketpm::{config::Limits, models::{Socket, TenantState}, quota::StaticQuotas};
//! # use socketpm::storage::{MemoryFileStorage, StagedFiles};
//! # use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let limits = Limits::default();
//! # let quotas = StaticQuotas::default();
//! # let mut state = TenantState::default();
//! # let mut files = StagedFiles::new(Arc::new(MemoryFileStorage::new()));
//! # let mut socket = Socket::new(1, "demo", "key", "0.1");
//! # let dependencies = Vec::new();
//! let grouped = group_dependencies(dependencies);
//! let mut processor = Processor::new("acme", &mut socket, &mut state, &mut files, &quotas, &limits);
//!
//! processor.check(&grouped, false)?;
//! for (kind, deps) in &grouped {
//!     let installed = processor.process(*kind, deps)?;
//!     println!("{}: {} objects", kind, installed.len());
//! }
//! processor.cleanup(false)?;
//! # Ok(())
//! # }
//! ```

mod class;
mod endpoint;
mod event_handler;
mod files;
mod hosting;
mod script;

pub(crate) use class::unref_class;

use crate::config::Limits;
use crate::dependency::{Dependency, DependencyKind};
use crate::models::{Installed, Socket, TenantState};
use crate::quota::Quotas;
use crate::storage::StagedFiles;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Dependencies grouped by kind, kinds in order of first occurrence.
pub type Grouped = IndexMap<DependencyKind, Vec<Dependency>>;

pub fn group_dependencies(dependencies: Vec<Dependency>) -> Grouped {
    let mut grouped = Grouped::new();
    for dependency in dependencies {
        grouped.entry(dependency.kind()).or_default().push(dependency);
    }
    grouped
}

/// Objects produced by the current install, used to decide what to clean up.
#[derive(Debug, Default)]
pub struct InstalledObjects {
    /// Ledger paths confirmed or written
    pub file_list: Vec<String>,
    pub endpoints: HashSet<String>,
    pub scripts: HashSet<u64>,
    pub classes: HashSet<String>,
    pub hostings: HashSet<String>,
    pub triggers: HashSet<u64>,
    pub schedules: HashSet<u64>,
    pub handlers: HashSet<u64>,
}

pub struct Processor<'a> {
    tenant: &'a str,
    socket: &'a mut Socket,
    state: &'a mut TenantState,
    files: &'a mut StagedFiles,
    quotas: &'a dyn Quotas,
    limits: &'a Limits,
    /// `installed` as it was before this install
    previous: Installed,
    objects: InstalledObjects,
}

impl<'a> Processor<'a> {
    pub fn new(
        tenant: &'a str,
        socket: &'a mut Socket,
        state: &'a mut TenantState,
        files: &'a mut StagedFiles,
        quotas: &'a dyn Quotas,
        limits: &'a Limits,
    ) -> Self {
        let previous = socket.installed.clone();
        Self {
            tenant,
            socket,
            state,
            files,
            quotas,
            limits,
            previous,
            objects: InstalledObjects::default(),
        }
    }

    pub fn objects(&self) -> &InstalledObjects {
        &self.objects
    }

    /// Run every kind's pre-flight check. Nothing is mutated.
    ///
    /// Partial installs never clean up classes, so there is nothing to confirm.
    pub fn check(&self, grouped: &Grouped, partial: bool) -> Result<()> {
        for kind in DependencyKind::ALL {
            let deps = grouped.get(&kind).map(Vec::as_slice).unwrap_or_default();
            if kind == DependencyKind::Class && !partial {
                self.check_classes(deps)?;
            }
        }
        Ok(())
    }

    /// Process all dependencies of one kind.
    ///
    /// Business errors are reported as `Dependency <Label>[<name>] ...` with the
    /// dependency's manifest line.
    pub fn process(&mut self, kind: DependencyKind, deps: &[Dependency]) -> Result<IndexMap<String, Value>> {
        let mut data = IndexMap::new();

        for dependency in deps {
            let label = match dependency.name() {
                Some(name) => format!("{}[{}]", kind.label(), name),
                None => kind.label().to_string(),
            };
            debug!(socket = %self.socket.name, dependency = %label, "Processing dependency");

            let produced = self
                .process_dependency(dependency, deps)
                .map_err(|e| wrap_error(e, &label, dependency.line()))?;
            data.extend(produced);
        }
        Ok(data)
    }

    fn process_dependency(&mut self, dependency: &Dependency, all: &[Dependency]) -> Result<IndexMap<String, Value>> {
        match dependency {
            Dependency::Spec { source, checksum } => {
                let manifest = self.limits.manifest_name.clone();
                self.add_file(&manifest, source, checksum, false)?;
                Ok(IndexMap::new())
            }
            Dependency::Endpoint(endpoint) => self.process_endpoint(endpoint),
            Dependency::Script(script) => {
                self.install_script(script)?;
                Ok(IndexMap::new())
            }
            Dependency::Class(class) => self.process_class(class, all),
            Dependency::Group { name } => {
                self.process_group(name);
                Ok(IndexMap::new())
            }
            Dependency::Hosting(hosting) => self.process_hosting(hosting),
            Dependency::EventHandler(handler) => self.process_event_handler(handler),
            Dependency::Helper(helper) => {
                self.add_file(&helper.path, &helper.source, &helper.checksum, true)?;
                Ok(IndexMap::new())
            }
        }
    }

    /// Remove what the socket no longer produces, then prune the file ledger.
    ///
    /// Partial installs only prune helpers, and only when an explicit
    /// `zip_file_list` says which files the bundle represents.
    pub fn cleanup(&mut self, partial: bool) -> Result<()> {
        if partial && self.socket.zip_file_list.is_none() {
            return Ok(());
        }

        if !partial {
            for kind in DependencyKind::ALL {
                match kind {
                    DependencyKind::Endpoint => self.cleanup_endpoints(),
                    DependencyKind::Script => self.cleanup_scripts(),
                    DependencyKind::Class => self.cleanup_classes(),
                    DependencyKind::Hosting => self.cleanup_hostings(),
                    DependencyKind::EventHandlerData => self.cleanup_triggers(),
                    DependencyKind::EventHandlerSchedule => self.cleanup_schedules(),
                    _ => {}
                }
            }
        }

        self.prune_files(partial);
        Ok(())
    }
}

fn wrap_error(err: Error, label: &str, line: Option<usize>) -> Error {
    match err {
        Error::Validation { message, line: at } => Error::processing_at(
            format!("Dependency {} validation error. {}", label, message),
            at.or(line),
        ),
        Error::Processing { message, line: at } => Error::processing_at(
            format!("Dependency {} processing error: {}", label, message),
            at.or(line),
        ),
        other => other,
    }
}

/// Attribute a validation error to one field of the object being saved.
fn field_error(field: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |err| match err {
        Error::Validation { message, line } => Error::Validation {
            message: format!("\"{}\": {}", field, message),
            line,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests;
