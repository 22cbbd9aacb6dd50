//! Repair loop module.
//!
//! - [`manager`] - The loop that drives execute, classify, gather,
//!   synthesize and apply
//! - [`state`] - Loop phase and the state threaded through each tick
//! - [`log`] - Per-iteration records and their persistence
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ RepairLoop  │────>│ LoopState    │────>│ ExecutionLog  │
//! └─────────────┘     └──────────────┘     └───────────────┘
//!       │                                          │
//!       v                                          v
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ Executor    │     │ Classifier / │     │ LogStore      │
//! │             │     │ Synthesizer  │     │ (atomic JSON) │
//! └─────────────┘     └──────────────┘     └───────────────┘
//! ```

pub mod log;
pub mod manager;
pub mod state;

// Re-exports for convenience
pub use log::{ExecutionLog, ExecutionLogStore, IterationRecord, LogSummary};
pub use manager::{RepairDependencies, RepairLoop, RepairOutcome, EXHAUSTED_EXIT_CODE};
pub use state::{LoopPhase, LoopState};
