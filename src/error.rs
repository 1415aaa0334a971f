//! Error types for the Kestrel cluster lifecycle engine.
//!
//! This module provides the error hierarchy for every stage of the pipeline:
//! configuration, change classification, provisioning, state management and
//! orchestration. Operator cancellation is not an error; it is reported as an
//! outcome by the provisioners and the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Kestrel.
#[derive(Debug, Error)]
pub enum KestrelError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Change classification errors.
    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    /// Provisioner errors.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Pipeline errors.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (node, host, port).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A working directory could not be determined.
    #[error("Cannot determine working directory: {message}")]
    NoWorkingDirectory {
        /// Description of the problem.
        message: String,
    },
}

/// Change classification errors.
///
/// All of these abort the pipeline before any provisioner runs.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The configuration trees contain paths the schema does not describe.
    #[error("Schema drift, unknown paths: {}", .paths.join(", "))]
    SchemaDrift {
        /// Every unknown path, shallowest node of each unknown subtree.
        paths: Vec<String>,
    },

    /// One or more changes are forbidden by the severity policy.
    #[error("Forbidden changes: {}", .paths.join(", "))]
    Forbidden {
        /// Every offending path.
        paths: Vec<String>,
    },

    /// An identity-keyed list element has no usable identity.
    #[error("Invalid list identity at {path}: {reason}")]
    InvalidIdentity {
        /// Path of the list element.
        path: String,
        /// What is wrong with the identity.
        reason: String,
    },

    /// A path pattern could not be parsed.
    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Provisioner errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The pinned engine binary could not be found or installed.
    #[error("Failed to resolve {product} {version}: {message}")]
    BinaryResolution {
        /// Product name of the engine.
        product: String,
        /// Pinned version.
        version: String,
        /// Description of the failure.
        message: String,
    },

    /// Generated input files could not be written.
    #[error("Failed to write input file {path}: {message}")]
    InputFiles {
        /// Path of the input file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The engine subprocess could not be started.
    #[error("Failed to start '{action}': {message}")]
    Spawn {
        /// Engine action being run.
        action: String,
        /// Description of the failure.
        message: String,
    },

    /// The engine subprocess exited with an unexpected code.
    #[error("'{action}' failed with exit code {exit_code}")]
    Subprocess {
        /// Engine action being run.
        action: String,
        /// Exit code reported by the engine (-1 when killed by a signal).
        exit_code: i32,
    },

    /// The engine subprocess was interrupted by the operator.
    #[error("'{action}' was interrupted")]
    Interrupted {
        /// Engine action being run.
        action: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The working directory is locked by another pipeline.
    #[error("Working directory is locked by another process (lock holder: {holder}, since: {since})")]
    LockContention {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// State storage failed.
    #[error("State storage error: {message}")]
    StorageError {
        /// Description of the storage error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Changes require full recreation and nobody acknowledged it.
    #[error("Changes require full cluster recreation and were not acknowledged: {}", .paths.join(", "))]
    RecreateNotAcknowledged {
        /// Paths of the recreate-class changes.
        paths: Vec<String>,
    },

    /// The operator could not be asked for confirmation.
    #[error("Cannot ask for confirmation: {message}")]
    PromptUnavailable {
        /// Why the prompt failed.
        message: String,
    },
}

/// Result type alias for Kestrel operations.
pub type Result<T> = std::result::Result<T, KestrelError>;

impl KestrelError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error was raised before any provisioner could run.
    #[must_use]
    pub const fn is_pre_provisioning(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Classify(_)
                | Self::Pipeline(PipelineError::RecreateNotAcknowledged { .. })
                | Self::State(StateError::LockContention { .. })
        )
    }

    /// Returns the process exit code reported by a failed engine run, if any.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Provision(ProvisionError::Subprocess { exit_code, .. }) => Some(*exit_code),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl ClassifyError {
    /// Creates an invalid pattern error.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

impl ProvisionError {
    /// Creates a binary resolution error.
    #[must_use]
    pub fn binary(product: &str, version: &str, message: impl Into<String>) -> Self {
        Self::BinaryResolution {
            product: product.to_string(),
            version: version.to_string(),
            message: message.into(),
        }
    }

    /// Creates an input file error.
    #[must_use]
    pub fn input_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InputFiles {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_lists_every_path() {
        let err = KestrelError::from(ClassifyError::Forbidden {
            paths: vec!["cluster.name".to_string(), "network.cidr".to_string()],
        });

        let message = err.to_string();
        assert!(message.contains("cluster.name"));
        assert!(message.contains("network.cidr"));
        assert!(err.is_pre_provisioning());
    }

    #[test]
    fn test_subprocess_error_carries_exit_code() {
        let err = KestrelError::from(ProvisionError::Subprocess {
            action: "plan".to_string(),
            exit_code: 1,
        });

        assert_eq!(err.exit_code(), Some(1));
        assert!(err.to_string().contains("'plan'"));
        assert!(!err.is_pre_provisioning());
    }
}
