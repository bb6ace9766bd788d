//! Host lifecycle states and allowed transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Uninitialized => "uninitialized",
            HostState::Initialized => "initialized",
            HostState::Running => "running",
            HostState::Stopped => "stopped",
        }
    }

    /// Whether the host may move from `self` to `next`.
    ///
    /// Initialization happens exactly once, and a stopped host can be started again.
    pub fn can_transition_to(&self, next: HostState) -> bool {
        matches!(
            (self, next),
            (HostState::Uninitialized, HostState::Initialized)
                | (HostState::Initialized, HostState::Running)
                | (HostState::Running, HostState::Stopped)
                | (HostState::Stopped, HostState::Running)
        )
    }

    /// Initialized at some point, whether or not currently running
    pub fn is_initialized(&self) -> bool {
        !matches!(self, HostState::Uninitialized)
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
