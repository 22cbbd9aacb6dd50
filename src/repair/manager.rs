//! Core repair loop.
//!
//! # Architecture
//!
//! Each tick of the [`RepairLoop`]:
//! 1. Runs the target through the [`ScriptExecutor`]
//! 2. On failure, asks the [`FailureClassifier`] which files are involved
//! 3. Reads those files with the [`ContextGatherer`]
//! 4. Asks the [`FixSynthesizer`] for a full replacement of the target
//! 5. Writes an applicable replacement atomically
//! 6. Appends an [`IterationRecord`] and persists the whole log
//!
//! # Dependency Injection
//!
//! Side effects go through [`RepairDependencies`], so the loop can be
//! driven entirely by mocks in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use mender::{RepairConfig, RepairDependencies, RepairLoop};
//!
//! let config = RepairConfig::default();
//! let deps = RepairDependencies::real(&config)?;
//! let outcome = RepairLoop::new(config, deps)?.run().await?;
//! println!("{} after {} iteration(s)", outcome.phase, outcome.iterations);
//! ```

use super::log::{ExecutionLog, ExecutionLogStore, IterationRecord};
use super::state::{LoopPhase, LoopState};
use crate::classify::{file_ids, FailureClassifier};
use crate::config::RepairConfig;
use crate::context::ContextGatherer;
use crate::error::{MenderError, Result};
use crate::operations::{ProcessExecutor, RealFileSystem};
use crate::oracle::{GeminiClient, Oracle, RetryingOracle};
use crate::synthesize::{FixSynthesizer, CONTENT_NOT_FOUND};
use crate::testing::{FailureReport, FileSystem, ScriptExecutor};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Exit code reported when the budget runs out.
pub const EXHAUSTED_EXIT_CODE: i32 = 3;

/// Dependencies for the repair loop.
///
/// # Example
///
/// ```rust,ignore
/// use mender::testing::{MockExecutor, MockFileSystem, MockOracle};
///
/// let deps = RepairDependencies {
///     executor: Arc::new(MockExecutor::always_succeeding()),
///     fs: Arc::new(MockFileSystem::new()),
///     oracle: Arc::new(MockOracle::new()),
/// };
/// ```
#[derive(Clone)]
pub struct RepairDependencies {
    /// Runs the target.
    pub executor: Arc<dyn ScriptExecutor>,
    /// Reads context, writes the target and the log.
    pub fs: Arc<dyn FileSystem>,
    /// Classification and synthesis backend.
    pub oracle: Arc<dyn Oracle>,
}

impl std::fmt::Debug for RepairDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairDependencies")
            .field("executor", &"<dyn ScriptExecutor>")
            .field("fs", &"<dyn FileSystem>")
            .field("oracle", &self.oracle.model_name())
            .finish()
    }
}

impl RepairDependencies {
    /// Create real dependencies for production use.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::MissingInterpreter`] if no interpreter can be
    /// resolved.
    pub fn real(config: &RepairConfig) -> Result<Self> {
        let executor =
            ProcessExecutor::resolve(config.interpreter.as_deref(), config.run_timeout())?;
        let oracle = RetryingOracle::new(
            GeminiClient::new(config.oracle.clone()),
            config.retry.clone(),
        );
        Ok(Self {
            executor: Arc::new(executor),
            fs: Arc::new(RealFileSystem::new()),
            oracle: Arc::new(oracle),
        })
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Terminal phase.
    pub phase: LoopPhase,
    /// Iterations executed.
    pub iterations: u32,
    pub log: ExecutionLog,
}

impl RepairOutcome {
    /// Whether the target ended up running cleanly.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.phase == LoopPhase::Succeeded
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.phase {
            LoopPhase::Succeeded => 0,
            LoopPhase::ExhaustedBudget => EXHAUSTED_EXIT_CODE,
            LoopPhase::Running => 1,
        }
    }
}

impl From<LoopState> for RepairOutcome {
    fn from(state: LoopState) -> Self {
        Self {
            phase: state.phase,
            iterations: state.iteration,
            log: state.log,
        }
    }
}

/// The iterative repair loop.
pub struct RepairLoop {
    config: RepairConfig,
    executor: Arc<dyn ScriptExecutor>,
    fs: Arc<dyn FileSystem>,
    classifier: FailureClassifier,
    gatherer: ContextGatherer,
    synthesizer: FixSynthesizer,
    store: ExecutionLogStore,
}

impl std::fmt::Debug for RepairLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairLoop")
            .field("config", &self.config)
            .field("log_path", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl RepairLoop {
    /// Create a loop from validated configuration and dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: RepairConfig, deps: RepairDependencies) -> Result<Self> {
        config.validate()?;
        let store = ExecutionLogStore::new(deps.fs.clone(), config.log_path.clone());
        Ok(Self {
            classifier: FailureClassifier::new(deps.oracle.clone()),
            gatherer: ContextGatherer::new(deps.fs.clone()),
            synthesizer: FixSynthesizer::new(deps.oracle),
            executor: deps.executor,
            fs: deps.fs,
            store,
            config,
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Run until the target succeeds or the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns any fatal error from [`RepairLoop::tick`].
    pub async fn run(&self) -> Result<RepairOutcome> {
        let mut state = LoopState::new();
        while !state.is_terminal() {
            state = self.tick(state).await?;
        }

        match state.phase {
            LoopPhase::Succeeded => info!(
                "Target succeeded after {} iteration(s)",
                state.iteration
            ),
            _ => warn!(
                "Reached maximum iterations ({}); target may not be fully corrected",
                self.config.max_iterations
            ),
        }
        Ok(state.into())
    }

    /// Execute one iteration.
    ///
    /// A terminal state is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be started, the fix cannot be
    /// written, or the log cannot be persisted.
    pub async fn tick(&self, mut state: LoopState) -> Result<LoopState> {
        if state.is_terminal() {
            return Ok(state);
        }

        state.iteration += 1;
        let iteration = state.iteration;
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Iteration {}/{}", iteration, self.config.max_iterations);

        let report = self.executor.run(&self.config.target).await?;
        let record = if report.succeeded {
            info!("Target executed successfully");
            IterationRecord::success(iteration, report, started_at)
        } else {
            self.attempt_repair(iteration, report, started_at).await?
        };
        let record = record.with_duration(clock.elapsed());
        let succeeded = record.report.succeeded;

        state.log.push(record);
        self.store.save(&state.log)?;

        state.phase = if succeeded {
            LoopPhase::Succeeded
        } else if iteration >= self.config.max_iterations {
            LoopPhase::ExhaustedBudget
        } else {
            LoopPhase::Running
        };
        debug!("Iteration {} finished: {}", iteration, state.phase);
        Ok(state)
    }

    async fn attempt_repair(
        &self,
        iteration: u32,
        report: FailureReport,
        started_at: DateTime<Utc>,
    ) -> Result<IterationRecord> {
        let target = &self.config.target;
        let failure_text = report.failure_text().to_string();
        warn!(
            "Target failed (exit code {:?}{})",
            report.exit_code,
            if report.timed_out { ", timed out" } else { "" }
        );

        let implicated = self.classifier.classify(&failure_text).await;
        let ids = file_ids(&implicated);
        info!("Implicated {} file(s)", ids.len());

        let context = self.gatherer.gather(&ids);
        let (target_contents, related) = self.gatherer.split_target(&context, target);
        let target_contents = target_contents.unwrap_or_else(|| CONTENT_NOT_FOUND.to_string());

        let proposal = self
            .synthesizer
            .synthesize(target, &target_contents, &failure_text, &related)
            .await;

        let mut fix_applied = false;
        match proposal.as_ref() {
            Some(p) => match p.corrected_script() {
                Some(script) => {
                    self.fs
                        .write_atomic(target, script)
                        .map_err(|e| MenderError::persist(target, e.to_string()))?;
                    fix_applied = true;
                    info!("Applied fix: {}", p.suggested_fix_summary);

                    let settle = self.config.settle_delay();
                    if !settle.is_zero() {
                        tokio::time::sleep(settle).await;
                    }
                }
                None => warn!("Proposal has no full corrected script; target unchanged"),
            },
            None => warn!("No fix proposal this iteration"),
        }

        Ok(IterationRecord::failure(
            iteration,
            report,
            implicated,
            proposal,
            context,
            fix_applied,
            started_at,
        ))
    }
}
