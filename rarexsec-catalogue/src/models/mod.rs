//! Data models for the catalogue pipeline
//!
//! Working state for processed samples. Nothing here is serialized directly; records
//! are converted into `rarexsec_common::catalogue` types at the end of a period.

pub mod sample;

pub use sample::{
    classify, BeamMonitorOutcome, ExtScaling, ExtTriggerOutcome, ProcessedSample,
    ProcessedVariation, PublicMetrics, SampleFailure, SampleMetrics, SampleOutcome, SampleState,
    SampleType,
};
