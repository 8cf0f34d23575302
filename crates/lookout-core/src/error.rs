//! Error types for Lookout operations.
//!
//! This module defines [`LookoutError`]. Probe and readiness calls never
//! produce these errors: they report failures as values. Errors surface from
//! lifecycle operations only when something outside the worker HTTP contract
//! goes wrong (spawning, signalling, reading a pid file) or when
//! configuration is unusable.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`LookoutError`].
pub type Result<T> = std::result::Result<T, LookoutError>;

/// Error type for all Lookout operations.
#[derive(Debug, Error)]
pub enum LookoutError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file not found
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// Worker unreachable (refused, reset, timed out)
    #[error("Worker {worker} unavailable: {message}")]
    TransportFailure { worker: String, message: String },

    /// Worker reachable but refused the request
    #[error("Worker {worker} rejected request ({status_code}): {message}")]
    WorkerRejection {
        worker: String,
        status_code: u16,
        message: String,
    },

    /// Worker process started but never reported healthy
    #[error("Worker {worker} not healthy after {attempts} attempts")]
    ReadinessTimeout { worker: String, attempts: u32 },

    /// Persistent state the orchestrator depends on is corrupt
    #[error("Malformed state in {path}: {message}")]
    MalformedState { path: PathBuf, message: String },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Worker process could not be spawned
    #[error("Failed to spawn worker {worker}: {message}")]
    SpawnFailed { worker: String, message: String },

    /// Termination signal could not be delivered
    #[error("Failed to signal process {pid}: {message}")]
    SignalFailed { pid: u32, message: String },

    // =========================================================================
    // Façade Errors
    // =========================================================================
    /// No action is running for the requested worker kind
    #[error("No active action for {worker}")]
    NoActiveAction { worker: String },

    /// Caller input cannot be sent to a worker
    #[error("Invalid request for {worker}: {message}")]
    InvalidRequest { worker: String, message: String },

    /// Internal error (bug in Lookout)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LookoutError {
    // =========================================================================
    // Constructor helpers for common error patterns
    // =========================================================================

    /// Create a ConfigNotFound error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a transport failure error
    pub fn transport(worker: impl ToString, message: impl Into<String>) -> Self {
        Self::TransportFailure {
            worker: worker.to_string(),
            message: message.into(),
        }
    }

    /// Create a spawn failure error
    pub fn spawn_failed(worker: impl ToString, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            worker: worker.to_string(),
            message: message.into(),
        }
    }

    /// Create a malformed state error
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Error classification helpers
    // =========================================================================

    /// Returns true if the caller can simply try again later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::ReadinessTimeout { .. }
        )
    }

    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. } | Self::ConfigInvalid { .. } | Self::ConfigValidation { .. }
        )
    }

    /// Returns true if this is a worker-related error
    pub fn is_worker_error(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. }
                | Self::WorkerRejection { .. }
                | Self::ReadinessTimeout { .. }
                | Self::SpawnFailed { .. }
        )
    }

    /// Message suitable for an end caller.
    ///
    /// Transport problems read as "try later", rejections are passed through
    /// verbatim, readiness and spawn problems point at the environment.
    pub fn user_message(&self) -> String {
        match self {
            Self::TransportFailure { worker, .. } => {
                format!("The {worker} service is unavailable. Please try again later.")
            }
            Self::WorkerRejection { message, .. } | Self::InvalidRequest { message, .. } => {
                message.clone()
            }
            Self::ReadinessTimeout { worker, .. } => format!(
                "The {worker} service started but never became ready. Check that it runs without errors and its port is free."
            ),
            Self::SpawnFailed { worker, .. } => {
                format!("Failed to start the {worker} process.")
            }
            other => other.to_string(),
        }
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Create ~/.lookout/config.yaml or pass --config")
            }
            Self::ConfigInvalid { .. } => Some("Check YAML syntax in the configuration file"),
            Self::ReadinessTimeout { .. } => {
                Some("Check the worker log file and make sure the worker port is available")
            }
            Self::SpawnFailed { .. } => {
                Some("Check the worker command and its permissions in the configuration file")
            }
            Self::MalformedState { .. } => {
                Some("Remove the corrupt pid file once the worker is confirmed stopped")
            }
            Self::TransportFailure { .. } => Some("Wait and try again"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_not_found_error() {
        let err = LookoutError::config_not_found("/home/user/.lookout/config.yaml");
        assert!(err.to_string().contains("Configuration not found"));
        assert!(err.is_config_error());
        assert!(err.guidance().is_some());
    }

    #[test]
    fn test_transport_failure_is_recoverable() {
        let err = LookoutError::transport("crowd-count", "connection refused");
        assert!(err.is_recoverable());
        assert!(err.is_worker_error());
        assert!(err.user_message().contains("try again later"));
    }

    #[test]
    fn test_rejection_message_is_verbatim() {
        let err = LookoutError::WorkerRejection {
            worker: "registration".into(),
            status_code: 400,
            message: "Face already registered for this user.".into(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.user_message(), "Face already registered for this user.");
    }

    #[test]
    fn test_readiness_timeout_distinct_from_spawn_failure() {
        let readiness = LookoutError::ReadinessTimeout {
            worker: "multi-auth".into(),
            attempts: 10,
        };
        let spawn = LookoutError::spawn_failed("multi-auth", "No such file or directory");
        assert_ne!(readiness.user_message(), spawn.user_message());
        assert!(readiness.is_recoverable());
        assert!(!spawn.is_recoverable());
    }

    #[test]
    fn test_malformed_state_guidance() {
        let err = LookoutError::malformed("/tmp/crowd.pid", "not a positive integer: \"abc\"");
        assert!(err.to_string().contains("/tmp/crowd.pid"));
        assert!(!err.is_worker_error());
        assert!(err.guidance().is_some());
    }
}
