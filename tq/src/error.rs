//! Queue error types

use thiserror::Error;

/// Errors raised synchronously by queue construction and task submission
///
/// Action failures never appear here; they are delivered to the task's
/// `on_reject` hook as an `eyre::Report`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid task: `type` must be a non-empty string")]
    EmptyTaskType,

    #[error("Invalid task: `id` must be a non-empty string when given")]
    EmptyTaskId,

    #[error("Duplicate task id: {id:?} is already pending or running")]
    DuplicateId { id: String },

    #[error("Invalid config `{field}` = {value}: {reason}")]
    InvalidConfig {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("concurrency_limit is owned by the adaptive controller and cannot be set")]
    ConcurrencyLimitReadOnly,

    #[error("Scheduler must be created inside a tokio runtime")]
    NoRuntime,
}

impl QueueError {
    /// Build an `InvalidConfig` error for a named field
    pub fn invalid_config(field: &'static str, value: impl ToString, reason: &'static str) -> Self {
        QueueError::InvalidConfig {
            field,
            value: value.to_string(),
            reason,
        }
    }

    /// Check if this is a validation error (malformed task or options)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueueError::EmptyTaskType | QueueError::EmptyTaskId | QueueError::InvalidConfig { .. }
        )
    }

    /// Check if this is a duplicate-id rejection
    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::DuplicateId { .. })
    }
}
