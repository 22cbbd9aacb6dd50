//! mender - iterative script repair
//!
//! Runs a failing script, asks a language model which files are involved,
//! gathers them, asks for a complete corrected version of the script,
//! writes it back, and repeats until the script runs cleanly or the
//! iteration budget is spent.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`repair`] - The repair loop, its state and its execution log
//! - [`classify`] - Failure output to implicated files and errors
//! - [`context`] - Reading implicated files into a snapshot
//! - [`synthesize`] - Fix proposals for the target
//! - [`oracle`] - Oracle trait, Gemini client, retry policy, response decoding
//! - [`operations`] - Real process executor and file system
//! - [`config`] - Configuration loading and validation
//! - [`lock`] - Per-target run lock
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (traits, mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use mender::{RepairConfig, RepairDependencies, RepairLoop};
//!
//! let config = RepairConfig::load(None)?.with_target("script.py");
//! let deps = RepairDependencies::real(&config)?;
//! let outcome = RepairLoop::new(config, deps)?.run().await?;
//! std::process::exit(outcome.exit_code());
//! ```

pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod operations;
pub mod oracle;
pub mod repair;
pub mod synthesize;
pub mod testing;

// Re-export commonly used types
pub use error::{MenderError, Result};

pub use config::{ConfigOverrides, RepairConfig};

pub use classify::{file_ids, ElementKind, FailureClassifier, ImplicatedElement};
pub use context::{ContextGatherer, FileSnapshot};
pub use synthesize::{FixProposal, FixSynthesizer};

pub use oracle::{
    DecodeError, GeminiClient, Oracle, OracleConfig, OracleError, OracleRequest, RetryPolicy,
    RetryingOracle,
};

pub use repair::{
    ExecutionLog, ExecutionLogStore, IterationRecord, LoopPhase, LoopState, RepairDependencies,
    RepairLoop, RepairOutcome,
};

pub use lock::RunLock;
pub use operations::{ProcessExecutor, RealFileSystem};

// Re-export testing types for convenience
pub use testing::{
    FailureReport, FileSystem, MockExecutor, MockFileSystem, MockOracle, ScriptExecutor,
};
