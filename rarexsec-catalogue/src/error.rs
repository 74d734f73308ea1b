//! Run-level errors
//!
//! Anything here aborts the whole run before or after processing; per-sample problems
//! are [`SampleFailure`](crate::models::SampleFailure) and never reach this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogueError {
    /// Recipe, settings or TOML problem
    #[error(transparent)]
    Config(#[from] rarexsec_common::Error),

    /// Prescale service client could not be constructed
    #[error("Prescale service setup failed: {0}")]
    Prescale(#[from] crate::services::PrescaleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CatalogueResult<T> = Result<T, CatalogueError>;
