//! Error types for the reconciliation engine.

use optisync_core::{CoreError, EntityKey};
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A remote create/update/delete call failed.
    #[error("remote call failed: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the remote reported the failure as transient.
        retryable: bool,
    },

    /// Collection or identity contract violation.
    #[error("collection error: {0}")]
    Core(#[from] CoreError),

    /// Undo requested on a row that has no parent value to restore.
    #[error("row {index} has no parent value to revert to")]
    UndoUnsupported {
        /// Index of the row.
        index: usize,
    },

    /// An edge endpoint has not been created remotely yet.
    #[error("edge {edge} references node {node} which has no identifier yet")]
    UnresolvedEndpoint {
        /// Key of the edge.
        edge: EntityKey,
        /// Key of the unresolved node.
        node: EntityKey,
    },

    /// The owning editor was closed.
    #[error("reconciler closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the remote reported this failure as transient.
    ///
    /// Informational only: the engine re-attempts on the next natural
    /// pass either way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Remote { retryable: true, .. })
    }
}
