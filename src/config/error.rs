//! Error types and result aliases.
//!
//! Defines the core `GateError` enumeration and common `Result` type.

use thiserror::Error;

/// Gate-specific errors.
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Identity backend unreachable or returned a fault.
    #[error("identity backend error: {0}")]
    Identity(String),

    /// Report status update rejected or failed.
    #[error("report error: {0}")]
    Report(String),
}

/// Result type alias for `GateError`.
pub type Result<T> = std::result::Result<T, GateError>;
