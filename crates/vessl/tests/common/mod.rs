//! Test utilities and common setup.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tempfile::TempDir;
use tokio::sync::watch;

use vessl::{
    Container, CreateOpts, EngineError, EngineResult, EventHub, EventSink, Executor,
    INIT_PROCESS_ID, Process, Service, StartProcessOpts, StateDir, Status,
};

/// Scripted exit outcome for a [`FakeProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeExit {
    Pending,
    Code(u32),
    Fail,
}

/// In-memory process whose exit is driven by the test.
pub struct FakeProcess {
    id: String,
    pid: OnceLock<u32>,
    exit_tx: watch::Sender<FakeExit>,
    exit_rx: watch::Receiver<FakeExit>,
}

impl FakeProcess {
    fn new(id: &str) -> Self {
        let (exit_tx, exit_rx) = watch::channel(FakeExit::Pending);
        Self {
            id: id.to_string(),
            pid: OnceLock::new(),
            exit_tx,
            exit_rx,
        }
    }

    fn mark_started(&self, pid: u32) {
        let _ = self.pid.set(pid);
    }

    /// Let every waiter observe this exit status.
    pub fn trigger_exit(&self, status: u32) {
        let _ = self.exit_tx.send(FakeExit::Code(status));
    }

    /// Make every waiter fail instead of observing an exit status.
    pub fn fail_wait(&self) {
        let _ = self.exit_tx.send(FakeExit::Fail);
    }
}

#[async_trait]
impl Process for FakeProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    fn status(&self) -> Status {
        match *self.exit_rx.borrow() {
            FakeExit::Pending if self.pid.get().is_some() => Status::Running,
            FakeExit::Pending => Status::Created,
            _ => Status::Stopped,
        }
    }

    async fn start(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn wait(&self) -> EngineResult<u32> {
        let mut rx = self.exit_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                FakeExit::Code(status) => return Ok(status),
                FakeExit::Fail => return Err(EngineError::ProcessNotExited(self.id.clone())),
                FakeExit::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::ProcessNotExited(self.id.clone()));
            }
        }
    }

    async fn signal(&self, _signal: i32) -> EngineResult<()> {
        Ok(())
    }
}

/// Executor double that keeps everything in memory and lets tests script
/// process exits and inspect delivered signals.
///
/// Owns its state root so on-disk state lives exactly as long as the
/// executor.
pub struct FakeExecutor {
    state_root: TempDir,
    containers: DashMap<String, Arc<Container>>,
    fakes: DashMap<(String, String), Arc<FakeProcess>>,
    signals: Mutex<Vec<(String, String, i32)>>,
    next_pid: Mutex<u32>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            state_root: TempDir::new().unwrap(),
            containers: DashMap::new(),
            fakes: DashMap::new(),
            signals: Mutex::new(Vec::new()),
            next_pid: Mutex::new(100),
        }
    }

    /// The scripted process behind a container/process id pair.
    pub fn fake_process(&self, container_id: &str, process_id: &str) -> Arc<FakeProcess> {
        let key = (container_id.to_string(), process_id.to_string());
        Arc::clone(self.fakes.get(&key).expect("no such fake process").value())
    }

    /// Signals delivered through the executor, in order.
    pub fn delivered_signals(&self) -> Vec<(String, String, i32)> {
        self.signals.lock().unwrap().clone()
    }

    fn register_process(
        &self,
        container: &Container,
        id: &str,
        is_init: bool,
    ) -> EngineResult<Arc<FakeProcess>> {
        container.state_dir().new_process(id)?;
        let process = Arc::new(FakeProcess::new(id));
        container.add_process(Arc::clone(&process) as Arc<dyn Process>, is_init);
        self.fakes
            .insert((container.id().to_string(), id.to_string()), Arc::clone(&process));
        Ok(process)
    }

    fn allocate_pid(&self) -> u32 {
        let mut next = self.next_pid.lock().unwrap();
        *next += 1;
        *next
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn create(&self, id: &str, opts: CreateOpts) -> EngineResult<Arc<Container>> {
        if self.containers.contains_key(id) {
            return Err(EngineError::ContainerExists(id.to_string()));
        }
        let state_dir = StateDir::create(self.state_root.path(), id)?;
        let container = Arc::new(Container::new(id, opts.bundle, state_dir));
        self.register_process(&container, INIT_PROCESS_ID, true)?;
        self.containers.insert(id.to_string(), Arc::clone(&container));
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
        container.state_dir().delete()?;
        self.containers.remove(container.id());
        self.fakes.retain(|(cid, _), _| cid != container.id());
        container.set_status(Status::Deleted);
        Ok(())
    }

    async fn start(&self, container: &Container) -> EngineResult<()> {
        let process = self.fake_process(container.id(), INIT_PROCESS_ID);
        process.mark_started(self.allocate_pid());
        container.set_status(Status::Running);
        Ok(())
    }

    async fn pause(&self, container: &Container) -> EngineResult<()> {
        container.set_status(Status::Paused);
        Ok(())
    }

    async fn resume(&self, container: &Container) -> EngineResult<()> {
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
        let process = self.register_process(container, &opts.id, false)?;
        process.mark_started(self.allocate_pid());
        Ok(process as Arc<dyn Process>)
    }

    async fn signal_process(
        &self,
        container: &Container,
        process_id: &str,
        signal: i32,
    ) -> EngineResult<()> {
        if container.process(process_id).is_none() {
            return Err(EngineError::ProcessNotFound(process_id.to_string()));
        }
        self.signals
            .lock()
            .unwrap()
            .push((container.id().to_string(), process_id.to_string(), signal));
        Ok(())
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
        self.fakes
            .remove(&(container.id().to_string(), process_id.to_string()));
        Ok(())
    }
}

/// A service wired to a scripted executor and an in-process event hub.
pub struct TestEngine {
    pub service: Service,
    pub hub: Arc<EventHub>,
    pub executor: Arc<FakeExecutor>,
}

/// Create a test engine with all pieces initialized.
pub fn test_engine() -> TestEngine {
    let executor = Arc::new(FakeExecutor::new());
    let hub = Arc::new(EventHub::new());
    let service = Service::new(
        Arc::clone(&executor) as Arc<dyn Executor>,
        Arc::clone(&hub) as Arc<dyn EventSink>,
    );
    TestEngine {
        service,
        hub,
        executor,
    }
}
