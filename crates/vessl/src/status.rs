//! Container and process lifecycle states.
//!
//! The state set is closed: `created -> running -> {paused <-> running} ->
//! stopped -> deleted`. Transition legality is checked explicitly rather than
//! trusted to callers.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Lifecycle state of a container or process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created but not yet started.
    Created,
    /// Running.
    Running,
    /// Paused by an explicit pause call.
    Paused,
    /// Exited or torn down; processes no longer run.
    Stopped,
    /// Removed. Terminal: no further operations resolve this id.
    Deleted,
}

impl Status {
    /// Whether moving from `self` to `to` is a legal lifecycle transition.
    pub fn can_transition(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Created, Status::Running)
                | (Status::Running, Status::Paused)
                | (Status::Paused, Status::Running)
                | (Status::Running, Status::Stopped)
                | (Status::Stopped, Status::Deleted)
        )
    }

    /// Whether a start call is legal from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Status::Created)
    }

    /// Whether a pause call is legal from this state.
    pub fn can_pause(self) -> bool {
        matches!(self, Status::Running)
    }

    /// Whether a resume call is legal from this state.
    pub fn can_resume(self) -> bool {
        matches!(self, Status::Paused)
    }

    /// Whether deletion is legal from this state without forcing.
    pub fn can_delete(self) -> bool {
        matches!(self, Status::Stopped)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Created => write!(f, "created"),
            Status::Running => write!(f, "running"),
            Status::Paused => write!(f, "paused"),
            Status::Stopped => write!(f, "stopped"),
            Status::Deleted => write!(f, "deleted"),
        }
    }
}

/// Validate a lifecycle transition, returning an error naming both states
/// when it is illegal.
pub fn validate_transition(from: Status, to: Status) -> EngineResult<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}
