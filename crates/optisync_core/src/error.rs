//! Error types for OptiSync core.

use thiserror::Error;

use crate::entity::EntityKey;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core collection and identity operations.
///
/// Every variant is a caller contract violation. Transient remote failures
/// never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Index outside the collection.
    #[error("index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// Length of the collection at the time of the call.
        len: usize,
    },

    /// No entity with the given key exists in the collection.
    #[error("no entity with key {0:?}")]
    UnknownKey(EntityKey),

    /// A non-empty identifier string is not in canonical form.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}
