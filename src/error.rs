//! Error types for datapile
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using PileError
pub type Result<T> = std::result::Result<T, PileError>;

/// Unified error type for data pile operations
#[derive(Debug, Error)]
pub enum PileError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read or short write against the backing stream
    #[error("Stream operation failed: expected {expected} bytes, got {actual}")]
    StreamOperation { expected: usize, actual: usize },

    // -------------------------------------------------------------------------
    // File Format Errors
    // -------------------------------------------------------------------------
    /// Unsupported format version or addressing limit
    #[error("Format not compatible: {0}")]
    NotCompatible(String),

    /// Signature mismatch, missing table or malformed block
    #[error("File broken: {0}")]
    FileBroken(String),

    #[error("Cannot open file: {0}")]
    FileOpen(String),

    #[error("Size limit exceeded: {0}")]
    ExceedLimit(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Bad function call: {0}")]
    BadFunctionCall(String),

    #[error("Invalid attribute name: {0}")]
    InvalidAttributeName(String),

    #[error("Invalid attribute value: {0}")]
    InvalidAttributeValue(String),

    /// Lookup on an attribute that has no index
    #[error("Attribute is not indexed: {0}")]
    NotIndexed(String),

    // -------------------------------------------------------------------------
    // Internal Errors
    // -------------------------------------------------------------------------
    #[error("Internal error: {0}")]
    Internal(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
