//! Custom error types for mender.
//!
//! Only conditions that must stop the repair loop live here. Degraded
//! outcomes (a failing target, an unreachable oracle, a missing context
//! file, an unusable proposal) are handled inside the loop and never
//! surface as a [`MenderError`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mender operations
#[derive(Error, Debug)]
pub enum MenderError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Target Execution Errors
    // =========================================================================
    /// No interpreter could be resolved for the target
    #[error("No interpreter found (tried: {tried})")]
    MissingInterpreter { tried: String },

    /// The target process could not be started
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Another run holds the lock for this target
    #[error("Target {path} is locked by another mender run")]
    Locked { path: PathBuf },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Writing the execution log or the target failed
    #[error("Failed to persist {path}: {message}")]
    Persist { path: PathBuf, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MenderError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid-value error for a named field
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persist(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persist {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error was caused by user configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingInterpreter { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Locked { .. } => 2,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingInterpreter { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for mender results
pub type Result<T> = std::result::Result<T, MenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MenderError::invalid("max_iterations", "must be at least 1");
        assert!(err.to_string().contains("max_iterations"));
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MenderError::config("bad").exit_code(), 7);
        assert_eq!(
            MenderError::Locked {
                path: PathBuf::from("script.py")
            }
            .exit_code(),
            2
        );
        assert_eq!(
            MenderError::persist("log.json", "disk full").exit_code(),
            1
        );
        assert_eq!(
            MenderError::MissingInterpreter {
                tried: "python3, python".into()
            }
            .exit_code(),
            7
        );
    }

    #[test]
    fn test_is_config() {
        assert!(MenderError::config("x").is_config());
        assert!(MenderError::invalid("a", "b").is_config());
        assert!(!MenderError::persist("log.json", "x").is_config());
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/mender.toml");
        let err = MenderError::config_with_path("failed to parse", path.clone());
        if let MenderError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: MenderError = io_err.into();
        assert!(matches!(err, MenderError::Io(_)));
        assert!(err.to_string().contains("access denied"));
        assert_eq!(err.exit_code(), 1);
    }
}
