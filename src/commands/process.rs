use super::{backend, drain, print_status};
use anyhow::Result;
use socketpm::coordinator::Coordinator;
use socketpm::environment::EnvironmentService;
use socketpm::queue;
use socketpm::service::SocketService;
use std::sync::Arc;

pub fn run(tenant: &str) -> Result<()> {
    let backend = backend()?;

    for (name, status) in EnvironmentService::new(backend.clone()).process_pending(tenant)? {
        println!("  Environment {}: {:?}", name, status);
    }

    let coordinator = Arc::new(Coordinator::new(backend.clone())?);
    let (handle, worker) = queue::channel(coordinator, backend.config.worker.clone());
    handle.enqueue(tenant)?;
    drain(tenant, worker)?;

    for socket in SocketService::new(backend, None).list(tenant)? {
        print_status(&socket);
    }
    Ok(())
}
