//! Real implementations of testable traits.
//!
//! These implementations spawn the actual interpreter and touch the actual
//! file system. They implement the same traits as the mocks, enabling
//! dependency injection.

use crate::error::{MenderError, Result};
use crate::testing::{FailureReport, FileSystem, ScriptExecutor};
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Interpreters tried, in order, when none is configured.
pub const DEFAULT_INTERPRETERS: [&str; 2] = ["python3", "python"];

/// Runs the target as `<interpreter> <target>`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    interpreter: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Create an executor for an already-resolved interpreter.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Resolve `interpreter` (or the first available default) on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::MissingInterpreter`] if nothing resolves.
    pub fn resolve(interpreter: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let candidates: Vec<&str> = match interpreter {
            Some(name) => vec![name],
            None => DEFAULT_INTERPRETERS.to_vec(),
        };

        for candidate in &candidates {
            if let Ok(path) = which::which(candidate) {
                debug!("Using interpreter {}", path.display());
                return Ok(Self::new(path, timeout));
            }
        }

        Err(MenderError::MissingInterpreter {
            tried: candidates.join(", "),
        })
    }

    /// The resolved interpreter path.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

#[async_trait]
impl ScriptExecutor for ProcessExecutor {
    async fn run(&self, target: &Path) -> Result<FailureReport> {
        debug!(
            "Running {} {}",
            self.interpreter.display(),
            target.display()
        );

        let mut child = Command::new(&self.interpreter)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MenderError::Spawn {
                program: self.interpreter.display().to_string(),
                message: e.to_string(),
            })?;

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut readers = [
            tokio::spawn(drain(child.stdout.take(), stdout.clone())),
            tokio::spawn(drain(child.stderr.take(), stderr.clone())),
        ];

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed out target: {}", e);
                    }
                    // Grandchildren may still hold the pipes open.
                    let _ = tokio::time::timeout(PIPE_GRACE, async {
                        for reader in &mut readers {
                            let _ = reader.await;
                        }
                    })
                    .await;
                    for reader in &readers {
                        reader.abort();
                    }
                    return Ok(FailureReport::timeout(
                        captured(&stdout),
                        limit.as_secs(),
                    ));
                }
            },
            None => child.wait().await?,
        };

        for reader in readers {
            if let Ok(Err(e)) = reader.await {
                warn!("Failed to read target output: {}", e);
            }
        }

        let stdout = captured(&stdout);
        if status.success() {
            Ok(FailureReport::success(stdout))
        } else {
            Ok(FailureReport::failure(stdout, captured(&stderr), status.code()))
        }
    }
}

/// How long to keep reading after a timed out target is killed.
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// Copy `pipe` into `buffer` until EOF, so partial output survives a kill.
async fn drain<R>(pipe: Option<R>, buffer: Arc<Mutex<Vec<u8>>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        if let Ok(mut buffer) = buffer.lock() {
            buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn captured(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Write `contents` to `path` via a sibling temp file and a rename.
///
/// Existing permissions on `path` are carried over to the new file.
///
/// # Errors
///
/// Returns the I/O error from any step; the temp file is removed on failure.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        if let Ok(meta) = std::fs::metadata(path) {
            std::fs::set_permissions(&tmp, meta.permissions())?;
        }
        std::fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_else(|| path.as_os_str()));
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Real file system implementation.
///
/// Relative paths resolve against the process working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl RealFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        write_atomic(path, contents)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}
