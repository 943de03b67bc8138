//! Reference executor running plain host processes.
//!
//! [`LocalExecutor`] implements the [`Executor`] contract by spawning
//! ordinary OS processes with no isolation at all. It exists for development
//! and testing: the full lifecycle (create from a bundle, start, pause,
//! resume, signal, exec, delete) behaves like a real runtime invoker while
//! only depending on the host.
//!
//! A bundle is a directory with a `config.json` describing the init process:
//!
//! ```json
//! { "process": { "args": ["/bin/sleep", "30"] } }
//! ```
//!
//! Pause and resume are SIGSTOP/SIGCONT on the init process. The terminal
//! flag is ignored; no pty is allocated.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::container::Container;
use crate::error::{EngineError, EngineResult};
use crate::executor::{
    CreateOpts, Executor, INIT_PROCESS_ID, IoBindings, ProcessSpec, StartProcessOpts,
};
use crate::process::{Process, exit_status_code};
use crate::statedir::StateDir;
use crate::status::Status;

/// Bundle file describing the init process.
const BUNDLE_CONFIG_FILE: &str = "config.json";

/// File inside a process's state directory holding its OS pid.
const PID_FILE: &str = "pid";

/// Configuration for [`LocalExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalExecutorConfig {
    /// Directory holding per-container state. Created if missing.
    pub state_root: PathBuf,
}

/// On-disk bundle configuration.
#[derive(Debug, Deserialize)]
struct BundleConfig {
    process: ProcessSpec,
}

fn read_bundle_config(bundle: &Path) -> EngineResult<BundleConfig> {
    let path = bundle.join(BUNDLE_CONFIG_FILE);
    let data = fs::read(&path).map_err(|err| EngineError::InvalidBundle {
        path: bundle.to_path_buf(),
        message: format!("reading {BUNDLE_CONFIG_FILE}: {err}"),
    })?;
    let config: BundleConfig =
        serde_json::from_slice(&data).map_err(|err| EngineError::InvalidBundle {
            path: bundle.to_path_buf(),
            message: format!("parsing {BUNDLE_CONFIG_FILE}: {err}"),
        })?;
    if config.process.args.is_empty() {
        return Err(EngineError::InvalidBundle {
            path: bundle.to_path_buf(),
            message: "process.args must not be empty".to_string(),
        });
    }
    Ok(config)
}

/// Send a signal to an OS process.
fn kill(pid: u32, signal: i32) -> EngineResult<()> {
    // SAFETY: plain kill(2) call, no pointers involved.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == -1 {
        return Err(EngineError::Kill {
            pid,
            signal,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn stdio_for(path: Option<&Path>, read: bool) -> EngineResult<Stdio> {
    match path {
        Some(path) => {
            let file = if read {
                fs::File::open(path)
            } else {
                fs::File::create(path)
            };
            let file = file.map_err(|err| EngineError::fs("opening stdio path", path, err))?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::null()),
    }
}

/// Exit outcome of a local process, distributed to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    /// Not exited yet (possibly not even launched).
    Pending,
    /// Exited with this status.
    Exited(u32),
    /// The real outcome can no longer be observed.
    Abandoned,
}

/// One process run directly on the host.
///
/// The launch is deferred: a `LocalProcess` is inert until [`Process::start`]
/// spawns the OS process together with one reaper task. The reaper waits for
/// the child, records the exit status on a watch channel shared by all
/// waiters, and for the init process marks the owning container stopped.
pub struct LocalProcess {
    id: String,
    spec: ProcessSpec,
    io: IoBindings,
    process_dir: PathBuf,
    container: Weak<Container>,
    is_init: bool,
    pid: OnceLock<u32>,
    spawn_lock: Mutex<()>,
    exit_tx: Arc<watch::Sender<ExitState>>,
    exit_rx: watch::Receiver<ExitState>,
}

impl LocalProcess {
    fn new(
        id: impl Into<String>,
        spec: ProcessSpec,
        io: IoBindings,
        process_dir: PathBuf,
        container: Weak<Container>,
        is_init: bool,
    ) -> Self {
        let (exit_tx, exit_rx) = watch::channel(ExitState::Pending);
        Self {
            id: id.into(),
            spec,
            io,
            process_dir,
            container,
            is_init,
            pid: OnceLock::new(),
            spawn_lock: Mutex::new(()),
            exit_tx: Arc::new(exit_tx),
            exit_rx,
        }
    }

    async fn spawn(&self) -> EngineResult<()> {
        let _guard = self.spawn_lock.lock().await;
        if self.pid.get().is_some() {
            return Err(EngineError::IllegalTransition {
                from: self.status(),
                to: Status::Running,
            });
        }

        let program = self.spec.args.first().ok_or_else(|| EngineError::Spawn {
            id: self.id.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argument vector",
            ),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&self.spec.args[1..])
            .stdin(stdio_for(self.io.stdin.as_deref(), true)?)
            .stdout(stdio_for(self.io.stdout.as_deref(), false)?)
            .stderr(stdio_for(self.io.stderr.as_deref(), false)?)
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            id: self.id.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| EngineError::Spawn {
            id: self.id.clone(),
            source: std::io::Error::other("process exited before its pid could be read"),
        })?;
        let _ = self.pid.set(pid);

        // scratch metadata only, a failure must not undo the spawn
        if let Err(err) = fs::write(self.process_dir.join(PID_FILE), pid.to_string()) {
            warn!(process = %self.id, error = %err, "failed to write pid file");
        }
        debug!(process = %self.id, pid, "spawned local process");

        let id = self.id.clone();
        let exit_tx = Arc::clone(&self.exit_tx);
        let container = self.container.clone();
        let is_init = self.is_init;
        tokio::spawn(async move {
            let state = match child.wait().await {
                Ok(status) => ExitState::Exited(exit_status_code(status)),
                Err(err) => {
                    warn!(process = %id, error = %err, "waiting on child failed");
                    ExitState::Abandoned
                }
            };
            let _ = exit_tx.send(state);
            if is_init
                && let Some(container) = container.upgrade()
                && matches!(container.status(), Status::Running | Status::Paused)
            {
                container.set_status(Status::Stopped);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Process for LocalProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    fn status(&self) -> Status {
        match *self.exit_rx.borrow() {
            ExitState::Exited(_) | ExitState::Abandoned => Status::Stopped,
            ExitState::Pending => {
                if self.pid.get().is_some() {
                    Status::Running
                } else {
                    Status::Created
                }
            }
        }
    }

    async fn start(&self) -> EngineResult<()> {
        self.spawn().await
    }

    async fn wait(&self) -> EngineResult<u32> {
        let mut rx = self.exit_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ExitState::Exited(code) => return Ok(code),
                ExitState::Abandoned => {
                    return Err(EngineError::ProcessNotExited(self.id.clone()));
                }
                ExitState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::ProcessNotExited(self.id.clone()));
            }
        }
    }

    async fn signal(&self, signal: i32) -> EngineResult<()> {
        let Some(pid) = self.pid.get().copied() else {
            return Err(EngineError::ProcessNotStarted(self.id.clone()));
        };
        kill(pid, signal)
    }
}

/// Executor running containers as plain host process groups.
pub struct LocalExecutor {
    state_root: PathBuf,
    containers: DashMap<String, Arc<Container>>,
}

impl LocalExecutor {
    /// Create an executor, making sure the state root exists.
    pub fn new(config: LocalExecutorConfig) -> EngineResult<Self> {
        fs::create_dir_all(&config.state_root)
            .map_err(|err| EngineError::fs("creating state root", &config.state_root, err))?;
        Ok(Self {
            state_root: config.state_root,
            containers: DashMap::new(),
        })
    }

    fn setup_container(
        &self,
        id: &str,
        opts: &CreateOpts,
        state_dir: StateDir,
    ) -> EngineResult<Arc<Container>> {
        let config = read_bundle_config(&opts.bundle)?;
        let container = Arc::new(Container::new(id, opts.bundle.clone(), state_dir));
        let process_dir = container.state_dir().new_process(INIT_PROCESS_ID)?;
        let init = Arc::new(LocalProcess::new(
            INIT_PROCESS_ID,
            config.process,
            opts.io.clone(),
            process_dir,
            Arc::downgrade(&container),
            true,
        ));
        container.add_process(init, true);
        Ok(container)
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn create(&self, id: &str, opts: CreateOpts) -> EngineResult<Arc<Container>> {
        if self.containers.contains_key(id) {
            return Err(EngineError::ContainerExists(id.to_string()));
        }
        let state_dir = StateDir::create(&self.state_root, id)?;
        let container = match self.setup_container(id, &opts, state_dir.clone()) {
            Ok(container) => container,
            Err(err) => {
                // undo the on-disk state so a failed create leaves nothing
                let _ = state_dir.delete();
                return Err(err);
            }
        };
        self.containers.insert(id.to_string(), Arc::clone(&container));
        debug!(container = %id, bundle = %opts.bundle.display(), "created container");
        Ok(container)
    }

    async fn load(&self, id: &str) -> EngineResult<Arc<Container>> {
        self.containers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_string()))
    }

    async fn list(&self) -> EngineResult<Vec<Arc<Container>>> {
        Ok(self
            .containers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect())
    }

    async fn delete(&self, container: &Container) -> EngineResult<()> {
        let id = container.id();
        // forced teardown: kill whatever is still alive and reap it before
        // removing state
        for process in container.processes() {
            if process.status() == Status::Stopped {
                continue;
            }
            if let Some(pid) = process.pid() {
                if let Err(err) = kill(pid, libc::SIGKILL) {
                    warn!(container = %id, process = %process.id(), error = %err, "kill failed");
                }
                let _ = process.wait().await;
            }
        }
        container.set_status(Status::Stopped);
        container.state_dir().delete()?;
        self.containers.remove(id);
        container.set_status(Status::Deleted);
        debug!(container = %id, "deleted container");
        Ok(())
    }

    async fn start(&self, container: &Container) -> EngineResult<()> {
        let current = container.status();
        if !current.can_start() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Running,
            });
        }
        let init = container
            .init_process()
            .ok_or_else(|| EngineError::NoInitProcess(container.id().to_string()))?;
        // mark running before the spawn so a reaper firing for an immediately
        // exiting init always observes a running container
        container.set_status(Status::Running);
        if let Err(err) = init.start().await {
            container.set_status(current);
            return Err(err);
        }
        debug!(container = %container.id(), pid = ?init.pid(), "started container");
        Ok(())
    }

    async fn pause(&self, container: &Container) -> EngineResult<()> {
        let current = container.status();
        if !current.can_pause() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Paused,
            });
        }
        let init = container
            .init_process()
            .ok_or_else(|| EngineError::NoInitProcess(container.id().to_string()))?;
        init.signal(libc::SIGSTOP).await?;
        container.set_status(Status::Paused);
        Ok(())
    }

    async fn resume(&self, container: &Container) -> EngineResult<()> {
        let current = container.status();
        if !current.can_resume() {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Running,
            });
        }
        let init = container
            .init_process()
            .ok_or_else(|| EngineError::NoInitProcess(container.id().to_string()))?;
        init.signal(libc::SIGCONT).await?;
        container.set_status(Status::Running);
        Ok(())
    }

    async fn status(&self, container: &Container) -> EngineResult<Status> {
        Ok(container.status())
    }

    async fn start_process(
        &self,
        container: &Container,
        opts: StartProcessOpts,
    ) -> EngineResult<Arc<dyn Process>> {
        let current = container.status();
        if current != Status::Running {
            return Err(EngineError::IllegalTransition {
                from: current,
                to: Status::Running,
            });
        }
        let process_dir = container.state_dir().new_process(&opts.id)?;
        let process = Arc::new(LocalProcess::new(
            opts.id.clone(),
            opts.spec,
            opts.io,
            process_dir,
            Weak::new(),
            false,
        ));
        if let Err(err) = process.start().await {
            let _ = container.state_dir().delete_process(&opts.id);
            return Err(err);
        }
        container.add_process(Arc::clone(&process) as Arc<dyn Process>, false);
        Ok(process)
    }

    async fn signal_process(
        &self,
        container: &Container,
        process_id: &str,
        signal: i32,
    ) -> EngineResult<()> {
        let process = container
            .process(process_id)
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        process.signal(signal).await
    }

    async fn delete_process(&self, container: &Container, process_id: &str) -> EngineResult<()> {
        let process = container
            .process(process_id)
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        if process.status() != Status::Stopped {
            return Err(EngineError::ProcessNotExited(process_id.to_string()));
        }
        // disk before map so a failed removal stays retryable
        container.state_dir().delete_process(process_id)?;
        container.remove_process(process_id);
        Ok(())
    }
}
