//! Lifecycle orchestration service.
//!
//! [`Service`] is the transport-facing façade: every externally triggered
//! operation translates into exactly one executor call, plus the bookkeeping
//! layered on top — belt-and-suspenders transition checks, per-container
//! serialization of mutating calls, and one detached monitor task per started
//! process that publishes the process's exit event.
//!
//! The executor remains the sole source of truth for which containers exist;
//! the service keeps no id registry of its own.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::container::Container;
use crate::error::{EngineError, EngineResult};
use crate::events::{self, EventSink, ExitEvent};
use crate::executor::{CreateOpts, Executor, StartProcessOpts};
use crate::process::Process;
use crate::status::Status;

/// External representation of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container id.
    pub id: String,
    /// Bundle the container was created from.
    pub bundle: PathBuf,
    /// Current lifecycle status.
    pub status: Status,
}

impl ContainerInfo {
    fn from_container(container: &Container) -> Self {
        Self {
            id: container.id().to_string(),
            bundle: container.bundle().to_path_buf(),
            status: container.status(),
        }
    }
}

/// External representation of a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id, unique within its container.
    pub id: String,
    /// OS process id, absent until the process has actually been launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ProcessInfo {
    fn from_process(process: &dyn Process) -> Self {
        Self {
            id: process.id().to_string(),
            pid: process.pid(),
        }
    }
}

/// Container lifecycle service.
pub struct Service {
    executor: Arc<dyn Executor>,
    events: Arc<dyn EventSink>,
    /// Per-container-id locks serializing mutating operations. Entries exist
    /// only while an operation holds them; operations on different ids
    /// proceed fully in parallel.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one mutating operation on a container id.
struct IdLockGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // keep the entry while another task still holds or awaits the lock
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Service {
    /// Create a service on top of an executor and an event sink.
    pub fn new(executor: Arc<dyn Executor>, events: Arc<dyn EventSink>) -> Self {
        Self {
            executor,
            events,
            locks: DashMap::new(),
        }
    }

    /// Create a container and register a monitor for its init process.
    ///
    /// Returns the container view together with the init process view.
    pub async fn create(
        &self,
        id: &str,
        opts: CreateOpts,
    ) -> EngineResult<(ContainerInfo, ProcessInfo)> {
        let _guard = self.lock_for(id).await;

        debug!(container = %id, bundle = %opts.bundle.display(), "creating container");
        let container = self.executor.create(id, opts).await?;
        let init = container
            .init_process()
            .ok_or_else(|| EngineError::NoInitProcess(id.to_string()))?;
        self.monitor_process(&container, Arc::clone(&init));

        Ok((
            ContainerInfo::from_container(&container),
            ProcessInfo::from_process(init.as_ref()),
        ))
    }

    /// Delete a container. Deleting an id that no longer resolves fails with
    /// [`EngineError::ContainerNotFound`].
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let _guard = self.lock_for(id).await;

        let container = self.executor.load(id).await?;
        self.executor.delete(&container).await?;
        debug!(container = %id, "deleted container");
        Ok(())
    }

    /// Views of all containers the executor currently knows.
    pub async fn list(&self) -> EngineResult<Vec<ContainerInfo>> {
        let containers = self.executor.list().await?;
        Ok(containers
            .iter()
            .map(|container| ContainerInfo::from_container(container))
            .collect())
    }

    /// View of one container.
    pub async fn get(&self, id: &str) -> EngineResult<ContainerInfo> {
        let container = self.executor.load(id).await?;
        Ok(ContainerInfo::from_container(&container))
    }

    /// Start a created container's init process.
    pub async fn start(&self, id: &str) -> EngineResult<()> {
        let _guard = self.lock_for(id).await;

        let container = self.executor.load(id).await?;
        let current = container.status();
        if !current.can_start() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Running,
            });
        }
        self.executor.start(&container).await
    }

    /// Pause a running container.
    pub async fn pause(&self, id: &str) -> EngineResult<()> {
        let _guard = self.lock_for(id).await;

        let container = self.executor.load(id).await?;
        let current = container.status();
        if !current.can_pause() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Paused,
            });
        }
        self.executor.pause(&container).await
    }

    /// Resume a paused container.
    pub async fn resume(&self, id: &str) -> EngineResult<()> {
        let _guard = self.lock_for(id).await;

        let container = self.executor.load(id).await?;
        let current = container.status();
        if !current.can_resume() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Running,
            });
        }
        self.executor.resume(&container).await
    }

    /// Start an additional process inside a container and register a monitor
    /// for it.
    pub async fn start_process(
        &self,
        container_id: &str,
        opts: StartProcessOpts,
    ) -> EngineResult<ProcessInfo> {
        let _guard = self.lock_for(container_id).await;

        let container = self.executor.load(container_id).await?;
        let process = self.executor.start_process(&container, opts).await?;
        self.monitor_process(&container, Arc::clone(&process));
        Ok(ProcessInfo::from_process(process.as_ref()))
    }

    /// View of one process, read from the container's in-memory process map.
    /// Only processes started through this service instance are visible.
    pub async fn get_process(
        &self,
        container_id: &str,
        process_id: &str,
    ) -> EngineResult<ProcessInfo> {
        let container = self.executor.load(container_id).await?;
        let process = container
            .process(process_id)
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        Ok(ProcessInfo::from_process(process.as_ref()))
    }

    /// Views of all processes in the container's in-memory process map.
    pub async fn list_processes(&self, container_id: &str) -> EngineResult<Vec<ProcessInfo>> {
        let container = self.executor.load(container_id).await?;
        Ok(container
            .processes()
            .iter()
            .map(|process| ProcessInfo::from_process(process.as_ref()))
            .collect())
    }

    /// Deliver a signal to one process of a container.
    pub async fn signal_process(
        &self,
        container_id: &str,
        process_id: &str,
        signal: i32,
    ) -> EngineResult<()> {
        let container = self.executor.load(container_id).await?;
        if container.process(process_id).is_none() {
            return Err(EngineError::ProcessNotFound(process_id.to_string()));
        }
        self.executor
            .signal_process(&container, process_id, signal)
            .await
    }

    /// Remove an exited process from a container.
    pub async fn delete_process(&self, container_id: &str, process_id: &str) -> EngineResult<()> {
        let _guard = self.lock_for(container_id).await;

        let container = self.executor.load(container_id).await?;
        if container.process(process_id).is_none() {
            return Err(EngineError::ProcessNotFound(process_id.to_string()));
        }
        self.executor.delete_process(&container, process_id).await
    }

    /// Spawn the detached monitor for one started process: wait for its exit
    /// and publish exactly one completion event. Monitors are never re-armed
    /// or cancelled; they end when `wait` returns. A failed `wait` publishes
    /// nothing.
    fn monitor_process(&self, container: &Container, process: Arc<dyn Process>) {
        let container_id = container.id().to_string();
        let process_id = process.id().to_string();
        let topic = events::process_exit_topic(&container_id, &process_id);
        let sink = Arc::clone(&self.events);

        tokio::spawn(async move {
            match process.wait().await {
                Ok(exit_status) => {
                    debug!(
                        container = %container_id,
                        process = %process_id,
                        exit_status,
                        "process exited"
                    );
                    sink.publish(
                        &topic,
                        ExitEvent {
                            timestamp: Utc::now(),
                            container_id,
                            process_id,
                            exit_status,
                        },
                    );
                }
                Err(err) => {
                    warn!(
                        container = %container_id,
                        process = %process_id,
                        error = %err,
                        "wait failed, exit status unknown"
                    );
                }
            }
        });
    }

    /// Acquire the mutation lock for one container id. Releasing the guard
    /// prunes the registry entry unless another task holds or awaits the same
    /// lock, so ids that never resolve to a container do not accumulate.
    async fn lock_for(&self, id: &str) -> IdLockGuard<'_> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        IdLockGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }
}
