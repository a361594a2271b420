//! Error types for rollgate
//!
//! All modules use `RollgateResult<T>` as their return type. Rollout stage
//! failures are not errors here: they end a rollout with a
//! [`RollbackReason`](crate::rollout::RollbackReason) instead.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for rollgate operations
pub type RollgateResult<T> = Result<T, RollgateError>;

/// All errors that can occur in rollgate
#[derive(Error, Debug)]
pub enum RollgateError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pipeline definition {path}: {reason}")]
    PipelineInvalid { path: PathBuf, reason: String },

    #[error("Invalid rollout plan: {0}")]
    PlanInvalid(String),

    // Cache errors
    #[error("Cache write failed for key {key}: {reason}")]
    CacheWriteFailure { key: String, reason: String },

    #[error("Cache index is corrupt: {0}")]
    CacheIndexCorrupt(String),

    #[error("Failed to read build input {path}: {reason}")]
    CacheInputRead { path: String, reason: String },

    // Credential errors
    #[error("Credential denied for {subject}: {reason}")]
    CredentialDenied { subject: String, reason: String },

    #[error("Credential expired for {subject}")]
    CredentialExpired { subject: String },

    #[error("Credential rejected: {0}")]
    CredentialInvalid(String),

    #[error("Trust secret not configured. Set credentials.trust_secret or ROLLGATE_TRUST_SECRET")]
    TrustSecretMissing,

    // Run errors
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Run {0} is already finished")]
    RunFinished(Uuid),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Build timed out after {0}s")]
    BuildTimeout(u64),

    #[error("Failed to persist run state: {0}")]
    RunPersist(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, output: {output}")]
    CommandExecution { command: String, output: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl RollgateError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a credential denial
    pub fn denied(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CredentialDenied {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CredentialExpired { .. } | Self::CacheWriteFailure { .. } | Self::BuildTimeout(_)
        )
    }

    /// Whether this error is absorbed by its component instead of failing the run
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::CacheWriteFailure { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TrustSecretMissing => Some("Run: export ROLLGATE_TRUST_SECRET=<secret>"),
            Self::CredentialDenied { .. } => {
                Some("Bind a policy under [credentials.policies] for the environment")
            }
            Self::ConfigInvalid { .. } => Some("Run: rollgate config show"),
            Self::RunNotFound(_) => Some("Run: rollgate runs --all"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = RollgateError::denied("run-1/staging", "no policy bound");
        assert_eq!(
            err.to_string(),
            "Credential denied for run-1/staging: no policy bound"
        );
    }

    #[test]
    fn error_hint() {
        let err = RollgateError::TrustSecretMissing;
        assert_eq!(
            err.hint(),
            Some("Run: export ROLLGATE_TRUST_SECRET=<secret>")
        );
        assert!(RollgateError::Internal("x".into()).hint().is_none());
    }

    #[test]
    fn error_retryable() {
        assert!(RollgateError::BuildTimeout(30).is_retryable());
        assert!(!RollgateError::TrustSecretMissing.is_retryable());
    }

    #[test]
    fn cache_write_failure_is_soft() {
        let err = RollgateError::CacheWriteFailure {
            key: "abc".into(),
            reason: "disk full".into(),
        };
        assert!(err.is_soft());
        assert!(!RollgateError::BuildFailed("boom".into()).is_soft());
    }
}
