pub mod config;
pub mod delete;
pub mod env;
pub mod install;
pub mod list;
pub mod pack;
pub mod process;
pub mod show;
pub mod update;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use socketpm::backend::Backend;
use socketpm::coordinator::Coordinator;
use socketpm::queue::{self, TaskOutcome};
use socketpm::service::{BundleSource, SocketService};
use socketpm::{Config, Socket, SocketStatus};
use std::sync::Arc;

pub fn backend() -> Result<Backend> {
    Ok(Backend::on_disk(Config::load()?))
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type.
pub fn parse_config(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut config = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected key=value, got \"{}\"", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        config.insert(key.to_string(), value);
    }
    Ok(config)
}

pub fn read_source(bundle: Option<&str>, url: Option<&str>) -> Result<Option<BundleSource>> {
    match (bundle, url) {
        (Some(path), _) => {
            let bytes = std::fs::read(path).with_context(|| format!("Could not read bundle {}", path))?;
            Ok(Some(BundleSource::Upload(bytes)))
        }
        (None, Some(url)) => Ok(Some(BundleSource::Url(url.to_string()))),
        (None, None) => Ok(None),
    }
}

/// Submit a request through a service wired to a local worker, then drain the queue.
///
/// With `defer` the socket stays queued for a later `socketpm process`.
pub fn submit<F>(tenant: &str, defer: bool, request: F) -> Result<Socket>
where
    F: FnOnce(&SocketService) -> socketpm::Result<Socket>,
{
    let backend = backend()?;
    let coordinator = Arc::new(Coordinator::new(backend.clone())?);
    let (handle, worker) = queue::channel(coordinator, backend.config.worker.clone());
    let service = SocketService::new(backend, Some(handle));

    let socket = request(&service)?;
    if defer {
        println!("  Queued: {} ({})", socket.name, socket.status);
        return Ok(socket);
    }

    drain(tenant, worker)?;
    Ok(service.get(tenant, &socket.name)?)
}

/// Run everything queued on `worker` and report per-tenant outcomes.
pub fn drain(tenant: &str, mut worker: queue::Worker) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let progress = spinner(&format!("Processing tenant {}...", tenant));
    let outcomes = runtime.block_on(worker.run_pending());
    progress.finish_and_clear();

    for (tenant, outcome) in outcomes {
        if let TaskOutcome::GaveUp(failed) = outcome {
            println!("  ⚠ Gave up on tenant {}: {} socket(s) failed", tenant, failed);
        }
    }
    Ok(())
}

pub fn print_status(socket: &Socket) {
    let mark = match socket.status {
        SocketStatus::Ok => "✓",
        SocketStatus::Error => "✗",
        SocketStatus::Prompt => "?",
        SocketStatus::Processing | SocketStatus::Checking => "…",
    };
    println!("{} {} [{}]", mark, socket.name, socket.status);
    if let Some(info) = &socket.status_info {
        match info.lineno {
            Some(line) => println!("  {} (line {})", info.error, line),
            None => println!("  {}", info.error),
        }
    }
}

/// Print the final status and fail the command for sockets that did not install.
pub fn finish(socket: &Socket) -> Result<()> {
    print_status(socket);
    match socket.status {
        SocketStatus::Error => anyhow::bail!("Socket \"{}\" failed to install", socket.name),
        SocketStatus::Prompt => anyhow::bail!(
            "Socket \"{}\" needs confirmation; re-run without --class-nodelete to apply",
            socket.name
        ),
        _ => Ok(()),
    }
}
