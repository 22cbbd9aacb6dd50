//! Configuration management for mender.
//!
//! Values are resolved in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A `mender.toml` file (the working directory, an explicit `--config`
//!    path, or `<user config dir>/mender/mender.toml`)
//! 3. [`ConfigOverrides`] collected from command-line flags and environment
//!
//! # Example mender.toml
//!
//! ```toml
//! target = "script.py"
//! max_iterations = 5
//! run_timeout_secs = 60
//!
//! [oracle]
//! model = "gemini-2.0-flash-001"
//! project = "my-gcp-project"
//!
//! [retry]
//! max_attempts = 4
//! ```

use crate::error::{MenderError, Result};
use crate::oracle::{OracleConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = "mender.toml";

/// Complete configuration for a repair run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Script to run and repair.
    #[serde(default = "default_target")]
    pub target: PathBuf,

    /// Interpreter used to run the target. Resolved from `PATH` when unset.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Where the execution log is written.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Deadline for a single run of the target.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Pause after writing a fix, before the next run.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_target() -> PathBuf {
    PathBuf::from("script.py")
}

fn default_max_iterations() -> u32 {
    10
}

fn default_log_path() -> PathBuf {
    PathBuf::from("full_execution_log.json")
}

fn default_settle_delay_ms() -> u64 {
    2000
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            interpreter: None,
            max_iterations: default_max_iterations(),
            log_path: default_log_path(),
            run_timeout_secs: None,
            settle_delay_ms: default_settle_delay_ms(),
            oracle: OracleConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Values supplied on the command line or through the environment.
///
/// `None` leaves the file/default value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub target: Option<PathBuf>,
    pub interpreter: Option<String>,
    pub max_iterations: Option<u32>,
    pub log_path: Option<PathBuf>,
    pub run_timeout_secs: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub model: Option<String>,
    pub project: Option<String>,
    pub location: Option<String>,
    pub retry_attempts: Option<u32>,
}

impl RepairConfig {
    /// Load configuration from disk.
    ///
    /// With an explicit `path` the file must exist. Otherwise `mender.toml`
    /// in the working directory is used, then the user config directory,
    /// then defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::Config`] if a file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::discover() {
                Some(found) => Self::from_file(&found),
                None => {
                    debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    Ok(Self::default())
                }
            },
        }
    }

    /// Parse a specific configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MenderError::config_with_path(format!("cannot read config: {e}"), path.to_path_buf())
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            MenderError::config_with_path(format!("cannot parse config: {e}"), path.to_path_buf())
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        Self::default_user_path().filter(|p| p.is_file())
    }

    /// `<user config dir>/mender/mender.toml`, if the platform has one.
    #[must_use]
    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mender").join(CONFIG_FILE_NAME))
    }

    /// Apply flag/environment overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(target) = overrides.target {
            self.target = target;
        }
        if let Some(interpreter) = overrides.interpreter {
            self.interpreter = Some(interpreter);
        }
        if let Some(max) = overrides.max_iterations {
            self.max_iterations = max;
        }
        if let Some(log_path) = overrides.log_path {
            self.log_path = log_path;
        }
        if let Some(secs) = overrides.run_timeout_secs {
            self.run_timeout_secs = Some(secs);
        }
        if let Some(ms) = overrides.settle_delay_ms {
            self.settle_delay_ms = ms;
        }
        if let Some(model) = overrides.model {
            self.oracle.model = model;
        }
        if let Some(project) = overrides.project {
            self.oracle.project = Some(project);
        }
        if let Some(location) = overrides.location {
            self.oracle.location = location;
        }
        if let Some(attempts) = overrides.retry_attempts {
            self.retry.max_attempts = attempts;
        }
        self
    }

    /// Builder-style setter for the target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = target.into();
        self
    }

    /// Builder-style setter for the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder-style setter for the log path.
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Builder-style setter for the settle delay.
    #[must_use]
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Builder-style setter for the interpreter.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Builder-style setter for the run deadline.
    #[must_use]
    pub fn with_run_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.run_timeout_secs = secs;
        self
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(MenderError::invalid("max_iterations", "must be at least 1"));
        }
        if self.target.as_os_str().is_empty() {
            return Err(MenderError::invalid("target", "must not be empty"));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(MenderError::invalid("log_path", "must not be empty"));
        }
        if self.log_path == self.target {
            return Err(MenderError::invalid(
                "log_path",
                "must differ from the target",
            ));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(MenderError::invalid(
                "run_timeout_secs",
                "must be greater than 0 when set",
            ));
        }
        if matches!(self.interpreter.as_deref(), Some(i) if i.trim().is_empty()) {
            return Err(MenderError::invalid("interpreter", "must not be blank"));
        }
        self.oracle
            .validate()
            .map_err(|(field, reason)| MenderError::invalid(field, reason))?;
        self.retry
            .validate()
            .map_err(|(field, reason)| MenderError::invalid(field, reason))?;
        Ok(())
    }

    /// Run deadline as a duration.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Settle delay as a duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
