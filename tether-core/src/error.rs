//! Error types for the reactive engine.
//!
//! Most engine operations cannot fail: reads, tracking and triggering are
//! infallible. The errors below cover writes that the underlying value shape
//! rejects and writes to read-only derived cells.

use thiserror::Error;

use crate::reactive::Key;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed value built from a bare getter was assigned to.
    #[error("unsupported operation: computed value has no setter")]
    ReadonlyComputed,

    /// A field key was used on a list.
    #[error("key {key} cannot address a list element")]
    KeyMismatch { key: Key },

    /// A list write skipped past the end of the list.
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The operation is not defined for this value shape.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Snapshotting a value to JSON failed.
    #[error("failed to serialize value: {0}")]
    Json(#[from] serde_json::Error),
}
