//! Trait definitions for testable abstractions.
//!
//! These traits abstract the repair loop's side effects so the loop can be
//! unit tested without spawning interpreters or touching the disk.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of one run of the target.
///
/// Serialized with the key names used by the execution log
/// (`success`, `output`, `stack_trace`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Whether the target exited with status zero.
    #[serde(rename = "success")]
    pub succeeded: bool,

    /// Captured standard output.
    #[serde(rename = "output", default)]
    pub stdout: String,

    /// Captured standard error; absent on success.
    #[serde(rename = "stack_trace", default)]
    pub stderr: Option<String>,

    /// Process exit code, absent when killed by a signal or deadline.
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Whether the run was cut short by the run deadline.
    #[serde(default)]
    pub timed_out: bool,
}

impl FailureReport {
    /// A successful run.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            stdout: stdout.into(),
            stderr: None,
            exit_code: Some(0),
            timed_out: false,
        }
    }

    /// A failed run.
    #[must_use]
    pub fn failure(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            succeeded: false,
            stdout: stdout.into(),
            stderr: Some(stderr.into()),
            exit_code,
            timed_out: false,
        }
    }

    /// A run killed after exceeding its deadline.
    #[must_use]
    pub fn timeout(stdout: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            succeeded: false,
            stdout: stdout.into(),
            stderr: Some(format!(
                "Process timed out after {timeout_secs}s and was killed"
            )),
            exit_code: None,
            timed_out: true,
        }
    }

    /// Text handed to the classifier and synthesizer.
    #[must_use]
    pub fn failure_text(&self) -> &str {
        self.stderr.as_deref().unwrap_or("")
    }
}

/// Abstraction for running the target.
///
/// # Example
///
/// ```rust,ignore
/// use mender::testing::ScriptExecutor;
///
/// async fn passes(executor: &dyn ScriptExecutor, target: &Path) -> bool {
///     executor.run(target).await.map(|r| r.succeeded).unwrap_or(false)
/// }
/// ```
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run the target once and capture its outcome.
    ///
    /// A failing target is an `Ok` report, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only when the target could not be started at all.
    async fn run(&self, target: &Path) -> Result<FailureReport>;
}

/// Abstraction for file system operations.
///
/// Enables testing file-dependent logic with in-memory files.
pub trait FileSystem: Send + Sync {
    /// Read file contents as a string.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; callers distinguish
    /// [`io::ErrorKind::NotFound`] from other failures.
    fn read_file(&self, path: &Path) -> io::Result<String>;

    /// Replace a file's contents so readers see either the old or the new
    /// contents, never a partial write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be written.
    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Resolve `path` to the form used to compare file identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not name an existing file.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_report_success() {
        let report = FailureReport::success("done\n");
        assert!(report.succeeded);
        assert_eq!(report.stderr, None);
        assert_eq!(report.failure_text(), "");
    }

    #[test]
    fn test_failure_report_failure() {
        let report = FailureReport::failure("", "Traceback ...", Some(1));
        assert!(!report.succeeded);
        assert_eq!(report.failure_text(), "Traceback ...");
        assert!(!report.timed_out);
    }

    #[test]
    fn test_failure_report_timeout() {
        let report = FailureReport::timeout("partial", 30);
        assert!(report.timed_out);
        assert_eq!(report.exit_code, None);
        assert!(report.failure_text().contains("30s"));
    }

    #[test]
    fn test_failure_report_wire_keys() {
        let value = serde_json::to_value(FailureReport::success("hi")).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "hi");
        assert!(value["stack_trace"].is_null());
    }
}
