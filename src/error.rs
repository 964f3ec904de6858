//! Error types for the Tollgate engine.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors: invalid rate declarations, unknown
    /// bucket algorithms, out-of-range limit indexes.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tree construction errors, e.g. sibling name collisions.
    #[error("Node error: {0}")]
    Node(String),

    /// A condition expression the configured evaluator does not support.
    #[error("Unsupported condition expression: {0}")]
    UnsupportedExpression(String),

    /// Errors from the bandwidth store backend.
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
