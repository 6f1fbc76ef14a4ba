//! Error types for calbridge.

use thiserror::Error;

/// Failures reported by a [`StorageTransport`](crate::batch::StorageTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The submitted batch exceeds the transport's payload limit. The batch writer
    /// reacts to this by splitting the batch.
    #[error("Transaction too large ({size} bytes, limit {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Operation #{index} failed: {reason}")]
    OperationFailed { index: usize, reason: String },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_too_large(&self) -> bool {
        matches!(self, TransportError::TooLarge { .. })
    }
}

/// Errors that can occur in calbridge operations.
#[derive(Error, Debug)]
pub enum CalBridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The item can't be persisted as it is (e.g. an event without start time).
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("Invalid recurrence rule '{rule}': {reason}")]
    InvalidRecurrenceRule { rule: String, reason: String },

    #[error("Invalid recurrence date list '{0}'")]
    InvalidRecurrenceSet(String),

    #[error("Can't transfer data to storage (too large data row can't be split)")]
    TransactionTooLarge(#[source] TransportError),

    #[error("Referenced operation #{0} didn't produce a valid result")]
    MissingResult(usize),

    #[error("Storage error: {0}")]
    Storage(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CalBridgeError {
    /// Whether this error comes from the storage layer (as opposed to invalid input).
    ///
    /// A storage failure during commit may leave already committed sub-batches behind.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            CalBridgeError::TransactionTooLarge(_)
                | CalBridgeError::MissingResult(_)
                | CalBridgeError::Storage(_)
        )
    }
}

/// Result type alias for calbridge operations.
pub type CalBridgeResult<T> = Result<T, CalBridgeError>;
