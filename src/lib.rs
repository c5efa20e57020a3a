//! socketpm - A socket installer for a multi-tenant backend platform
//!
//! A socket is a zip bundle with a `socket.yml` manifest describing endpoints,
//! scripts, data classes, event handlers and hosting sites. socketpm imports
//! the manifest, diffs it against what the socket installed last time, and
//! creates, updates or removes the platform objects accordingly:
//!
//! - Manifest parsing with line-accurate validation errors
//! - Class sharing between sockets with per-field reference counting
//! - All-or-nothing installs with per-socket savepoints inside a task
//! - Partial updates that only touch the files they ship
//! - A per-tenant task queue with coalescing and bounded retry
//!
//! # Examples
//!
//! ```no_run
//! use socketpm::backend::Backend;
//! use socketpm::coordinator::Coordinator;
//! use socketpm::service::{BundleSource, InstallRequest, SocketService};
//! use socketpm::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::on_disk(Config::load()?);
//! let service = SocketService::new(backend.clone(), None);
//!
//! // Record the socket, then run the install task
//! let bundle = std::fs::read("demo.zip")?;
//! service.install("acme", InstallRequest::new("demo", BundleSource::Upload(bundle)))?;
//!
//! let coordinator = Coordinator::new(backend)?;
//! for (name, status) in coordinator.run("acme")? {
//!     println!("{}: {}", name, status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`manifest`] - Parse `socket.yml` into a tree that remembers source lines
//! - [`importer`] - Validate the manifest and turn it into dependencies
//! - [`processor`] - Apply dependencies to the tenant state
//! - [`coordinator`] - Install and check tasks over a tenant's pending sockets
//! - [`queue`] - Async per-tenant task queue
//! - [`service`] - Install, update, config and delete requests
//! - [`environment`] - Shared socket environments
//! - [`store`] / [`storage`] - Tenant state and blob storage
//! - [`config`] - Limits, quotas and storage configuration
//! - [`error`] - Error types and result handling

pub mod archive;
pub mod backend;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod download;
pub mod environment;
pub mod error;
pub mod importer;
pub mod manifest;
pub mod models;
pub mod processor;
pub mod queue;
pub mod quota;
pub mod refs;
pub mod service;
pub mod storage;
pub mod store;
pub mod validators;

pub use config::Config;
pub use error::{Error, Result, StatusInfo};
pub use models::{Socket, SocketStatus, TenantState};
