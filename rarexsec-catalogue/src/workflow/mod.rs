//! Catalogue workflow
//!
//! - [`sample_processor`]: one sample entry to a terminal state
//! - [`period_normalizer`]: EXT equivalent exposure per period
//! - [`pipeline`]: recipe walk, two phases per period

pub mod period_normalizer;
pub mod pipeline;
pub mod sample_processor;

pub use pipeline::{build_pipeline, CataloguePipeline, RunSummary};
pub use sample_processor::{PeriodContext, ProcessorConfig, SampleProcessor};
