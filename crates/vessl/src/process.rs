//! Process capability abstraction.
//!
//! A [`Process`] is one OS-level execution unit living inside a container.
//! Implementations delegate to whatever runtime invoker actually owns the
//! process; the engine only consumes this contract.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::status::Status;

/// Exit status reported when the real outcome of a process cannot be
/// determined.
pub const UNKNOWN_EXIT_STATUS: u32 = 255;

/// One waitable, signalable process inside a container.
#[async_trait]
pub trait Process: Send + Sync {
    /// Process id, unique within the owning container.
    fn id(&self) -> &str;

    /// OS process id. `None` until an implementation that defers the actual
    /// launch has spawned the process.
    fn pid(&self) -> Option<u32>;

    /// Current lifecycle state, tracked independently of the container's.
    fn status(&self) -> Status;

    /// Launch the underlying OS process, for implementations that defer the
    /// launch until the container is started.
    async fn start(&self) -> EngineResult<()>;

    /// Block until the process exits and return its exit status.
    ///
    /// Processes killed by a signal report `128 + signal number`. Multiple
    /// tasks may wait on the same process concurrently; every waiter observes
    /// the same status.
    async fn wait(&self) -> EngineResult<u32>;

    /// Deliver a signal to the process.
    async fn signal(&self, signal: i32) -> EngineResult<()>;
}

/// Map an OS exit status to the engine's numeric convention: the plain exit
/// code when there is one, `128 + signal` for signal deaths, and
/// [`UNKNOWN_EXIT_STATUS`] otherwise.
pub fn exit_status_code(status: std::process::ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        code as u32
    } else if let Some(signal) = status.signal() {
        128 + signal as u32
    } else {
        UNKNOWN_EXIT_STATUS
    }
}
