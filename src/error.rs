//! Error types for the DHME

use chrono::{DateTime, Utc};
use thiserror::Error;
use crate::types::Stage;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Surrogate key conflict in {target}: {key} already holds a different version")]
    KeyConflict { target: String, key: String },

    #[error("Inconsistent target {target}: {reason}")]
    Inconsistent { target: String, reason: String },

    #[error("Run failed for {target} at stage {stage} (attempted watermark {attempted_watermark}): {source}")]
    RunFailed {
        target: String,
        stage: Stage,
        attempted_watermark: DateTime<Utc>,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Whether retrying the whole batch from scratch may succeed.
    ///
    /// Only storage failures are transient; configuration errors and key
    /// conflicts will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(e) => e.is_transient(),
            EngineError::RunFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Stage at which a run failed, if this error came out of `Engine::run`
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::RunFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn at_stage(self, target: &str, stage: Stage, attempted_watermark: DateTime<Utc>) -> Self {
        match self {
            // Already attributed by an inner stage
            EngineError::RunFailed { .. } => self,
            other => EngineError::RunFailed {
                target: target.to_string(),
                stage,
                attempted_watermark,
                source: Box::new(other),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown target: {target}")]
    UnknownTarget { target: String },

    #[error("Target {target} is declared more than once")]
    DuplicateTarget { target: String },

    #[error("Target {target} has no tracked columns")]
    MissingTrackedColumns { target: String },

    #[error("Target {target} has no business key column")]
    MissingBusinessKey { target: String },

    #[error("Target {target} references column {column} which the extract does not provide")]
    UnknownColumn { target: String, column: String },

    #[error("Target {target} lists column {column} more than once")]
    DuplicateColumn { target: String, column: String },

    #[error("Invalid rule {rule} on {target}: {reason}")]
    InvalidRule { target: String, rule: String, reason: String },

    #[error("Invalid setting {setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },

    #[error("No store bound for target {target}")]
    UnboundTarget { target: String },

    #[error("Failed to load configuration: {reason}")]
    Load { reason: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("Duplicate surrogate key {key}")]
    DuplicateKey { key: String },

    #[error("Row not found: {key}")]
    NotFound { key: String },

    #[error("Constraint violated on {key}: {reason}")]
    ConstraintViolation { key: String, reason: String },
}

impl StorageError {
    /// Transient errors are safe to retry; uniqueness violations are not
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("Version {key} is already closed")]
    AlreadyClosed { key: String },

    #[error("Version {key} cannot close at {valid_to}: interval must end after {valid_from}")]
    EmptyInterval {
        key: String,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    },
}

/// Problems with a single extract row. Never fatal to a run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("Missing value for column {column}")]
    MissingColumn { column: String },

    #[error("Column {column} holds {found}, expected {expected}")]
    InvalidValue { column: String, expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}
