//! # rarexsec common library
//!
//! Shared code for the catalogue tooling:
//! - Error type
//! - Layered configuration (CLI > ENV > TOML > compiled defaults)
//! - Recipe model and validation
//! - Catalogue model and writer
//! - Run/subrun identifiers

pub mod catalogue;
pub mod config;
pub mod error;
pub mod recipe;
pub mod types;

pub use error::{Error, Result};
pub use types::RunSubrun;
