//! In-memory container aggregate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::process::Process;
use crate::statedir::StateDir;
use crate::status::Status;

/// One sandboxed execution unit: identity, bundle, on-disk state, lifecycle
/// status, and the processes running inside it.
///
/// Containers are shared as `Arc<Container>` between the service, the
/// executor that produced them, and per-process monitor tasks; the process
/// map and status field are safe for concurrent access.
pub struct Container {
    id: String,
    bundle: PathBuf,
    state_dir: StateDir,
    status: RwLock<Status>,
    init_id: OnceLock<String>,
    processes: DashMap<String, Arc<dyn Process>>,
}

impl Container {
    /// Create a new container aggregate in the `created` state.
    pub fn new(id: impl Into<String>, bundle: impl Into<PathBuf>, state_dir: StateDir) -> Self {
        Self {
            id: id.into(),
            bundle: bundle.into(),
            state_dir,
            status: RwLock::new(Status::Created),
            init_id: OnceLock::new(),
            processes: DashMap::new(),
        }
    }

    /// Container id, assigned by the caller at creation time.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the filesystem/config bundle this container was created from.
    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    /// This container's on-disk state directory.
    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        *self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new lifecycle status.
    pub fn set_status(&self, status: Status) {
        *self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Register a process with this container. The first process registered
    /// with `is_init` becomes the init process; later init registrations keep
    /// the first and are only logged.
    pub fn add_process(&self, process: Arc<dyn Process>, is_init: bool) {
        if is_init && self.init_id.set(process.id().to_string()).is_err() {
            warn!(
                container = %self.id,
                process = %process.id(),
                "init process already registered, keeping the first"
            );
        }
        self.processes.insert(process.id().to_string(), process);
    }

    /// Remove a process from this container, returning it if present.
    pub fn remove_process(&self, process_id: &str) -> Option<Arc<dyn Process>> {
        self.processes.remove(process_id).map(|(_, process)| process)
    }

    /// Look up a process by id.
    pub fn process(&self, process_id: &str) -> Option<Arc<dyn Process>> {
        self.processes
            .get(process_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of all processes currently registered.
    pub fn processes(&self) -> Vec<Arc<dyn Process>> {
        self.processes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Id of the init process, once registered.
    pub fn init_id(&self) -> Option<&str> {
        self.init_id.get().map(String::as_str)
    }

    /// The init process, once registered.
    pub fn init_process(&self) -> Option<Arc<dyn Process>> {
        self.init_id().and_then(|id| self.process(id))
    }

    /// Wait for the init process to exit and return its exit status.
    pub async fn wait(&self) -> EngineResult<u32> {
        let init = self
            .init_process()
            .ok_or_else(|| EngineError::NoInitProcess(self.id.clone()))?;
        init.wait().await
    }
}

// the process map holds trait objects, so the summary is written by hand
impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("bundle", &self.bundle)
            .field("status", &self.status())
            .field("init_id", &self.init_id.get())
            .field("processes", &self.processes.len())
            .finish()
    }
}
