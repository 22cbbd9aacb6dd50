//! Mock implementations of testing traits.
//!
//! These mocks provide controllable test doubles for external dependencies,
//! enabling deterministic unit tests.

use super::traits::{FailureReport, FileSystem, ScriptExecutor};
use crate::error::Result;
use crate::oracle::{Oracle, OracleError, OracleRequest};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock implementation of the target executor.
///
/// Hands out scripted reports in order, then repeats the fallback.
///
/// # Example
///
/// ```rust,ignore
/// let executor = MockExecutor::new()
///     .with_report(FailureReport::failure("", "NameError", Some(1)))
///     .with_fallback(FailureReport::success(""));
/// ```
#[derive(Debug)]
pub struct MockExecutor {
    reports: Mutex<VecDeque<FailureReport>>,
    fallback: FailureReport,
    call_count: AtomicU32,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            fallback: FailureReport::failure("", "Error: mock failure", Some(1)),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockExecutor {
    /// Create a mock that always fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always succeeds.
    #[must_use]
    pub fn always_succeeding() -> Self {
        Self::new().with_fallback(FailureReport::success(""))
    }

    /// Queue a report for the next unscripted run.
    #[must_use]
    pub fn with_report(self, report: FailureReport) -> Self {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push_back(report);
        }
        self
    }

    /// Set the report returned once the queue is empty.
    #[must_use]
    pub fn with_fallback(mut self, report: FailureReport) -> Self {
        self.fallback = report;
        self
    }

    /// Get the number of times run was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptExecutor for MockExecutor {
    async fn run(&self, _target: &Path) -> Result<FailureReport> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.reports.lock().ok().and_then(|mut r| r.pop_front());
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Mock implementation of file system operations.
///
/// Uses an in-memory map to simulate file storage.
///
/// # Example
///
/// ```rust,ignore
/// let fs = MockFileSystem::new().with_file("a.py", "print(1)");
/// assert_eq!(fs.read_file(Path::new("a.py")).unwrap(), "print(1)");
/// ```
#[derive(Debug, Default)]
pub struct MockFileSystem {
    files: Mutex<BTreeMap<PathBuf, String>>,
    unreadable: BTreeSet<PathBuf>,
    fail_writes: bool,
    read_count: AtomicU32,
    write_count: AtomicU32,
}

impl MockFileSystem {
    /// Create a new empty mock file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single file.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), content.to_string());
        }
        self
    }

    /// Make reads of `path` fail with a permission error.
    #[must_use]
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        self.unreadable.insert(path.into());
        self
    }

    /// Make every write fail.
    #[must_use]
    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Current contents of a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path.as_ref()).cloned())
    }

    /// Number of read attempts.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }
}

impl FileSystem for MockFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.unreadable.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }
        self.contents(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )
        })
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::other(format!(
                "write refused: {}",
                path.display()
            )));
        }
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("mock file system poisoned"))?;
        files.insert(path.to_path_buf(), contents.to_string());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Lexical normalization; `.` and `..` are resolved without touching disk.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other),
            }
        }
        if self.contents(&normalized).is_some() {
            Ok(normalized)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            ))
        }
    }
}

/// Mock implementation of the oracle.
///
/// Responses are consumed in order; once exhausted every call fails with
/// [`OracleError::InvalidResponse`]. Every request is recorded.
///
/// # Example
///
/// ```rust,ignore
/// let oracle = MockOracle::new()
///     .with_response(r#"[{"element":"file","content":"script.py"}]"#)
///     .with_failure(OracleError::ServerError { message: "503".into() });
/// ```
#[derive(Debug, Default)]
pub struct MockOracle {
    responses: Mutex<VecDeque<std::result::Result<String, OracleError>>>,
    requests: Mutex<Vec<OracleRequest>>,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockOracle {
    /// Create a mock with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    #[must_use]
    pub fn with_response(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn with_failure(self, error: OracleError) -> Self {
        self.push(Err(error));
        self
    }

    /// Sleep before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, item: std::result::Result<String, OracleError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(item);
        }
    }

    /// Get the number of times generate was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn generate(&self, request: &OracleRequest) -> std::result::Result<String, OracleError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| {
                Err(OracleError::InvalidResponse {
                    message: "mock oracle has no scripted response".to_string(),
                })
            })
    }

    fn model_name(&self) -> &str {
        "mock-oracle"
    }
}
