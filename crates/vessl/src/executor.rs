//! Runtime invoker contract.
//!
//! An [`Executor`] performs the actual OS-level container and process
//! operations, typically by driving an external runtime. The engine treats it
//! as the sole source of truth for which containers exist: there is no
//! second registry that could drift from reality.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::error::EngineResult;
use crate::process::Process;
use crate::status::Status;

/// Id under which every container's init process is registered.
pub const INIT_PROCESS_ID: &str = "init";

/// Options for creating a container.
#[derive(Debug, Clone)]
pub struct CreateOpts {
    /// Path to the container's filesystem/config bundle.
    pub bundle: PathBuf,
    /// Standard stream bindings for the init process.
    pub io: IoBindings,
}

/// Options for starting an additional process inside a container.
#[derive(Debug, Clone)]
pub struct StartProcessOpts {
    /// Process id, unique within the container.
    pub id: String,
    /// What to execute.
    pub spec: ProcessSpec,
    /// Standard stream bindings for the new process.
    pub io: IoBindings,
}

/// Specification of a process to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Argument vector; `args[0]` is the program.
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Whether the process expects a terminal.
    #[serde(default)]
    pub terminal: bool,
}

/// File paths the standard streams are bound to. Unset streams are connected
/// to the null device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoBindings {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// External capability that creates, drives, and tears down containers and
/// their processes.
///
/// Contract: `create` must fail with
/// [`ContainerExists`](crate::EngineError::ContainerExists) when called twice
/// with the same id, never silently succeed; `load` must fail with
/// [`ContainerNotFound`](crate::EngineError::ContainerNotFound) when no
/// matching state exists. Every call may fail with a domain error and the
/// caller propagates it unchanged.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Create a new container from a bundle. The returned container is in the
    /// `created` state with its init process registered under
    /// [`INIT_PROCESS_ID`].
    async fn create(&self, id: &str, opts: CreateOpts) -> EngineResult<Arc<Container>>;

    /// Resolve an existing container by id.
    async fn load(&self, id: &str) -> EngineResult<Arc<Container>>;

    /// All containers this executor currently knows.
    async fn list(&self) -> EngineResult<Vec<Arc<Container>>>;

    /// Tear the container down and release its state.
    async fn delete(&self, container: &Container) -> EngineResult<()>;

    /// Start the container's init process.
    async fn start(&self, container: &Container) -> EngineResult<()>;

    /// Pause the container.
    async fn pause(&self, container: &Container) -> EngineResult<()>;

    /// Resume a paused container.
    async fn resume(&self, container: &Container) -> EngineResult<()>;

    /// Current status as observed by the runtime.
    async fn status(&self, container: &Container) -> EngineResult<Status>;

    /// Start an additional process inside a running container.
    async fn start_process(
        &self,
        container: &Container,
        opts: StartProcessOpts,
    ) -> EngineResult<Arc<dyn Process>>;

    /// Deliver a signal to one process of the container.
    async fn signal_process(
        &self,
        container: &Container,
        process_id: &str,
        signal: i32,
    ) -> EngineResult<()>;

    /// Remove an exited process and its per-process state.
    async fn delete_process(&self, container: &Container, process_id: &str) -> EngineResult<()>;
}
