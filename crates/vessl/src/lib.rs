//! Container lifecycle execution engine.
//!
//! This crate tracks containers and their processes through a small state
//! machine, persists per-container scratch state on disk, and publishes an
//! exit event for every process it started. The actual runtime work is done
//! by an [`Executor`] implementation; [`LocalExecutor`] ships as a reference
//! that runs plain host processes.

pub mod container;
pub mod error;
pub mod events;
pub mod executor;
pub mod local;
pub mod process;
pub mod service;
pub mod statedir;
pub mod status;

pub use container::Container;
pub use error::{EngineError, EngineResult};
pub use events::{EventHub, EventSink, ExitEvent, process_exit_topic};
pub use executor::{
    CreateOpts, Executor, INIT_PROCESS_ID, IoBindings, ProcessSpec, StartProcessOpts,
};
pub use local::{LocalExecutor, LocalExecutorConfig, LocalProcess};
pub use process::{Process, UNKNOWN_EXIT_STATUS, exit_status_code};
pub use service::{ContainerInfo, ProcessInfo, Service};
pub use statedir::StateDir;
pub use status::{Status, validate_transition};
