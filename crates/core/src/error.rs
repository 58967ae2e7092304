//! Error types for the Colony domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! carries the caller-visible taxonomy (not found, validation, concurrency,
//! capacity) plus the wrapped context errors.

use thiserror::Error;

/// The top-level error type for all Colony operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown worker or record id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed specification or content.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A resource changed underneath the caller (e.g. a worker loop exited
    /// while its handle was still registered).
    #[error("Concurrent modification: {0}")]
    Concurrency(String),

    /// A bounded resource is full.
    #[error("Capacity exceeded for {resource} (limit {limit})")]
    Capacity { resource: &'static str, limit: usize },

    // --- Task errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

impl Error {
    pub fn worker_not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound { kind: "worker", id: id.to_string() }
    }

    pub fn record_not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound { kind: "record", id: id.to_string() }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Task(e) => e.is_retryable(),
            Error::Capacity { .. } | Error::Concurrency(_) => true,
            _ => false,
        }
    }

    /// Whether the error means persistent state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Memory(e) if e.is_fatal())
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Task handler failed: {reason}")]
    Failed { reason: String },

    #[error("Task timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("No handler registered for specialization '{0}'")]
    NoHandler(String),
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed { reason: reason.into() }
    }

    /// Handler failures and timeouts are worth another attempt; a missing
    /// handler will fail identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Failed { .. } | TaskError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Journal is closed")]
    JournalClosed,

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl MemoryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::JournalClosed)
    }
}
