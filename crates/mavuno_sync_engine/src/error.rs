//! Error types for the sync engine.

use crate::queue::OperationId;
use mavuno_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures reported by a [`crate::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The attempt did not finish within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The remote could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The remote answered with an error status.
    #[error("server returned status {code}: {message}")]
    Status {
        /// Status code.
        code: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Live call failed while the device was online.
    #[error("server error: {0}")]
    TransientServer(#[source] TransportError),

    /// Live call failed while the device was offline.
    #[error("offline: {source}")]
    Connectivity {
        /// The failure of the live attempt.
        #[source]
        source: TransportError,
        /// Operation queued for later replay, for mutations.
        queued: Option<OperationId>,
    },

    /// Offline read with no fresh cache entry.
    #[error("no cached data available for {endpoint}")]
    NoCachedDataAvailable {
        /// Requested endpoint.
        endpoint: String,
    },

    /// A queued mutation failed replay too many times and was dropped.
    #[error("operation {operation_id} dropped after {attempts} failed attempts")]
    RetryExhausted {
        /// Dropped operation.
        operation_id: OperationId,
        /// Attempts made.
        attempts: u32,
    },

    /// A delivery handle outlived the engine that was to complete it.
    #[error("delivery abandoned before completion")]
    DeliveryAbandoned,

    /// Persisted state could not be loaded.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientServer(TransportError::Status { code, .. }) => *code >= 500,
            SyncError::TransientServer(_) => true,
            SyncError::Connectivity { .. } => true,
            _ => false,
        }
    }

    /// Returns the queued operation id, if this failure enqueued one.
    pub fn queued_operation(&self) -> Option<&OperationId> {
        match self {
            SyncError::Connectivity { queued, .. } => queued.as_ref(),
            _ => None,
        }
    }
}
