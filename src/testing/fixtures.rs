//! Test fixtures for creating reproducible test environments.
//!
//! Provides temporary directories holding a target script and a log path.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Python target that fails with a `NameError`.
pub const FAILING_SCRIPT: &str = "print('starting')\nprint(undefined_name)\n";

/// A temporary directory containing a target script.
///
/// Automatically cleans up when dropped.
pub struct TargetFixture {
    temp_dir: TempDir,
    target: PathBuf,
}

impl TargetFixture {
    /// Create a fixture whose target holds `contents`.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or the target cannot be created.
    #[must_use]
    pub fn with_target(name: &str, contents: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let target = temp_dir.path().join(name);
        std::fs::write(&target, contents).expect("Failed to write target");
        Self { temp_dir, target }
    }

    /// Create a fixture with a failing Python target.
    #[must_use]
    pub fn failing_target() -> Self {
        Self::with_target("script.py", FAILING_SCRIPT)
    }

    /// Root of the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of the target script.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path for the execution log inside the fixture.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.temp_dir.path().join("full_execution_log.json")
    }

    /// Write an additional file relative to the fixture root.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    /// Current target contents.
    ///
    /// # Panics
    ///
    /// Panics if the target cannot be read.
    #[must_use]
    pub fn read_target(&self) -> String {
        std::fs::read_to_string(&self.target).expect("Failed to read target")
    }
}
