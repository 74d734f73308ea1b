//! Test Helper Utilities
//!
//! Shared utilities for testing rarexsec-catalogue

#![allow(dead_code)]

pub mod event_files;
pub mod root_files;
pub mod stores;

pub use event_files::{subrun_tree, write_event_file, ConcatMerger, JsonEventReader};
pub use stores::{create_numi_db, create_runinfo_db};
