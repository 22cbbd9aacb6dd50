//! Loop state types and transitions.

use super::log::ExecutionLog;
use serde::{Deserialize, Serialize};

/// Where the repair loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// More iterations may run.
    Running,
    /// The target ran cleanly.
    Succeeded,
    /// The iteration budget ran out before the target succeeded.
    ExhaustedBudget,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::Running => write!(f, "running"),
            LoopPhase::Succeeded => write!(f, "succeeded"),
            LoopPhase::ExhaustedBudget => write!(f, "exhausted budget"),
        }
    }
}

/// State threaded through every tick of the repair loop.
///
/// # Example
///
/// ```
/// use mender::repair::{LoopPhase, LoopState};
///
/// let state = LoopState::new();
/// assert_eq!(state.iteration, 0);
/// assert_eq!(state.phase, LoopPhase::Running);
/// assert!(state.log.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    /// Iterations completed so far.
    pub iteration: u32,
    pub phase: LoopPhase,
    /// One record per completed iteration.
    pub log: ExecutionLog,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopState {
    /// Initial state: no iterations run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            iteration: 0,
            phase: LoopPhase::Running,
            log: ExecutionLog::new(),
        }
    }

    /// Whether no further ticks will change this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase != LoopPhase::Running
    }
}
