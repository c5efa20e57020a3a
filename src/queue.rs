//! Per-tenant task queue
//!
//! The request surface enqueues a tenant whenever one of its sockets needs
//! work. The [`Worker`] coalesces repeated triggers for the same tenant into
//! a single coordinator run, executes it on the blocking pool, and retries
//! infrastructure failures a bounded number of times before giving up on the
//! sockets still in flight.

use crate::config::WorkerConfig;
use crate::coordinator::Coordinator;
use crate::models::SocketStatus;
use crate::{Error, Result};
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Cheap handle for enqueuing tenants.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl QueueHandle {
    pub fn enqueue(&self, tenant: &str) -> Result<()> {
        self.sender
            .send(tenant.to_string())
            .map_err(|_| Error::Other("task queue is closed".to_string()))
    }
}

/// Outcome of one tenant task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done(Vec<(String, SocketStatus)>),
    /// Retries exhausted; this many sockets were marked failed
    GaveUp(usize),
}

pub struct Worker {
    coordinator: Arc<Coordinator>,
    config: WorkerConfig,
    receiver: mpsc::UnboundedReceiver<String>,
}

/// Create a connected queue handle and worker.
pub fn channel(coordinator: Arc<Coordinator>, config: WorkerConfig) -> (QueueHandle, Worker) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        QueueHandle { sender },
        Worker {
            coordinator,
            config,
            receiver,
        },
    )
}

impl Worker {
    /// Serve tasks until every queue handle has been dropped.
    pub async fn run(mut self) {
        while let Some(first) = self.receiver.recv().await {
            let batch = self.coalesce(first);
            for tenant in batch {
                self.run_task(&tenant).await;
            }
        }
        info!("Task queue closed");
    }

    /// Run whatever is queued right now, without waiting for more.
    pub async fn run_pending(&mut self) -> Vec<(String, TaskOutcome)> {
        let mut outcomes = Vec::new();
        while let Ok(first) = self.receiver.try_recv() {
            for tenant in self.coalesce(first) {
                let outcome = self.run_task(&tenant).await;
                outcomes.push((tenant, outcome));
            }
        }
        outcomes
    }

    /// Pull everything already queued behind `first`, dropping duplicate tenants.
    fn coalesce(&mut self, first: String) -> IndexSet<String> {
        let mut batch = IndexSet::new();
        batch.insert(first);
        while let Ok(tenant) = self.receiver.try_recv() {
            batch.insert(tenant);
        }
        batch
    }

    async fn run_task(&self, tenant: &str) -> TaskOutcome {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let coordinator = Arc::clone(&self.coordinator);
            let owned = tenant.to_string();
            let result = tokio::task::spawn_blocking(move || coordinator.run(&owned)).await;

            match result {
                Ok(Ok(statuses)) => {
                    info!(tenant = %tenant, sockets = statuses.len(), "Task finished");
                    return TaskOutcome::Done(statuses);
                }
                Ok(Err(e)) => {
                    warn!(tenant = %tenant, attempt, max_attempts = attempts, error = %e, "Task failed");
                }
                Err(e) => {
                    warn!(tenant = %tenant, attempt, max_attempts = attempts, error = %e, "Task panicked");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        let coordinator = Arc::clone(&self.coordinator);
        let owned = tenant.to_string();
        match tokio::task::spawn_blocking(move || coordinator.fail_pending(&owned)).await {
            Ok(Ok(failed)) => TaskOutcome::GaveUp(failed),
            Ok(Err(e)) => {
                error!(tenant = %tenant, error = %e, "Could not mark sockets as failed");
                TaskOutcome::GaveUp(0)
            }
            Err(e) => {
                error!(tenant = %tenant, error = %e, "Could not mark sockets as failed");
                TaskOutcome::GaveUp(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build_zip;
    use crate::backend::Backend;
    use crate::config::Config;
    use crate::models::Socket;

    fn setup(config: Config) -> (Backend, QueueHandle, Worker) {
        let backend = Backend::in_memory(config.clone());
        let coordinator = Arc::new(Coordinator::new(backend.clone()).unwrap());
        let (handle, worker) = channel(coordinator, config.worker);
        (backend, handle, worker)
    }

    fn stage(backend: &Backend, tenant: &str, name: &str, bundle: &[u8]) {
        let mut state = backend.store.load(tenant).unwrap();
        let id = state.next_id();
        let mut socket = Socket::new(id, name, format!("k{}", id), "0.1");
        let location = backend.files.save(&format!("{}/{}.zip", tenant, name), bundle).unwrap();
        socket.bundle = Some(location);
        state.sockets.insert(name.to_string(), socket);
        backend.store.save(tenant, &state).unwrap();
    }

    #[tokio::test]
    async fn test_triggers_are_coalesced() {
        let (backend, handle, mut worker) = setup(Config::default());
        let zip = build_zip([("socket.yml", b"description: x\n".to_vec())]).unwrap();
        stage(&backend, "acme", "demo", &zip);

        handle.enqueue("acme").unwrap();
        handle.enqueue("acme").unwrap();
        handle.enqueue("other").unwrap();

        let outcomes = worker.run_pending().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "acme");
        assert_eq!(
            outcomes[0].1,
            TaskOutcome::Done(vec![("demo".to_string(), SocketStatus::Ok)])
        );
        assert_eq!(outcomes[1].1, TaskOutcome::Done(Vec::new()));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut config = Config::default();
        config.worker.max_attempts = 2;
        config.worker.retry_delay_ms = 1;
        let (backend, handle, mut worker) = setup(config);

        // Bundle location that does not exist: an infrastructure failure
        stage(&backend, "acme", "demo", b"");
        let mut state = backend.store.load("acme").unwrap();
        state.sockets.get_mut("demo").unwrap().bundle = Some("acme/gone.zip".into());
        backend.store.save("acme", &state).unwrap();

        handle.enqueue("acme").unwrap();
        let outcomes = worker.run_pending().await;
        assert_eq!(outcomes, vec![("acme".to_string(), TaskOutcome::GaveUp(1))]);

        let socket = backend.store.load("acme").unwrap().sockets["demo"].clone();
        assert_eq!(socket.status, SocketStatus::Error);
        assert_eq!(socket.status_info.unwrap().error, crate::error::UNHANDLED_ERROR);
    }

    #[tokio::test]
    async fn test_run_stops_when_handles_dropped() {
        let (_backend, handle, worker) = setup(Config::default());
        handle.enqueue("acme").unwrap();
        drop(handle);
        worker.run().await;
    }
}
