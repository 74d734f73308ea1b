//! Common error types for rarexsec

use thiserror::Error;

/// Common result type for rarexsec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the catalogue tooling
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Recipe failed role/kind validation
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),
}
