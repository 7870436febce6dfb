//! Error types for meeting-sync
//!
//! Per-task conditions ([`TaskError`]) are isolated to the task they name and
//! never abort a batch. Batch-level invariant violations ([`Error::InvalidBatch`])
//! are programmer errors and fail fast when the batch is created.

use crate::types::{BatchId, CorrelationKey, CreateStatus, TaskId};
use thiserror::Error;

/// Result type alias for meeting-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for meeting-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "event_buffer")
        key: Option<String>,
    },

    /// A batch could not be created because its targets violate an invariant
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Batch not found in the registry
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    /// The batch was cancelled before every task finished
    #[error("batch {0} was cancelled")]
    BatchCancelled(BatchId),

    /// Task-level protocol error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Error reported by the transport collaborator
    #[error("transport error: {message}")]
    Transport {
        /// Error message from the transport
        message: String,
        /// Whether the failure is transient and worth retrying
        retryable: bool,
    },

    /// The progress channel ended before a completion event arrived
    #[error("progress channel for task {task_id} closed before completion")]
    ChannelClosed {
        /// The task whose channel closed
        task_id: TaskId,
    },

    /// The progress channel was silent for longer than the idle timeout
    #[error("progress channel for task {task_id} idle for {idle_secs}s")]
    ChannelIdle {
        /// The task whose channel went quiet
        task_id: TaskId,
        /// Configured idle timeout in seconds
        idle_secs: u64,
    },

    /// Shutdown in progress - not accepting new batches
    #[error("shutdown in progress: not accepting new batches")]
    ShuttingDown,
}

impl Error {
    /// A transient transport failure (retried with backoff)
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent transport failure (never retried)
    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Task-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A second creation result arrived for a task that already resolved
    #[error("task {key} already resolved as {status:?}")]
    AlreadyResolved {
        /// Correlation key of the task
        key: CorrelationKey,
        /// The status the task already holds
        status: CreateStatus,
    },

    /// A task id that is not present in any live batch
    #[error("task {0} is unknown")]
    UnknownTask(TaskId),

    /// A correlation key that is not present in the batch
    #[error("no task with key {key} in batch {batch_id}")]
    UnknownKey {
        /// Batch that was searched
        batch_id: BatchId,
        /// The missing key
        key: CorrelationKey,
    },

    /// The provisioning call returned a task id already used by another task
    #[error("task id {0} is already assigned to another task")]
    DuplicateTaskId(TaskId),

    /// Operation requires a task whose transfer has not finished
    #[error("cannot {operation} task {task_id}: {reason}")]
    InvalidTransition {
        /// The task the operation targeted
        task_id: TaskId,
        /// The operation that was attempted (e.g., "resync")
        operation: String,
        /// Why the current state rejects it
        reason: String,
    },
}
