//! Processed sample state
//!
//! A sample entry moves through the processor to one of three terminal states:
//! Skipped (inactive), Failed (per-sample error), or Completed. Completed samples
//! carry type-specific metrics; the reconciliation detail used by period scaling stays
//! in these structures and only reaches the catalogue through [`ProcessedSample::into_record`].

use crate::services::merge_tool::MergeError;
use crate::services::prescale_client::PrescaledTriggers;
use indexmap::IndexMap;
use rarexsec_common::catalogue::{
    BeamRunMetrics, CatalogueSample, DetvarRecord, PotEquivComponents, SampleKind,
};
use rarexsec_common::recipe::RecipeSample;
use rarexsec_common::RunSubrun;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

/// Recipe `sample_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Mc,
    Data,
    Ext,
    Dirt,
}

impl SampleType {
    /// Case-insensitive; absent means `mc`, unknown values fall back to `mc` with a warning
    pub fn from_recipe(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return SampleType::Mc;
        };
        match raw.to_ascii_lowercase().as_str() {
            "mc" => SampleType::Mc,
            "data" => SampleType::Data,
            "ext" => SampleType::Ext,
            "dirt" => SampleType::Dirt,
            other => {
                tracing::warn!(sample_type = other, "Unknown sample_type, treating as mc");
                SampleType::Mc
            }
        }
    }
}

/// Classification by fixed precedence: ext > dirt > data > strangeness marker > beam
pub fn classify(sample: &RecipeSample) -> SampleKind {
    let sample_type = sample
        .sample_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    match sample_type.as_str() {
        "ext" => return SampleKind::Ext,
        "dirt" => return SampleKind::Dirt,
        "data" => return SampleKind::Data,
        _ => {}
    }

    let key = sample.sample_key.as_deref().unwrap_or("").to_lowercase();
    let truth = sample.truth_filter.as_deref().unwrap_or("").to_lowercase();
    if key.contains("strange") || truth.contains("strange") || truth.contains("mc_n_strange") {
        return SampleKind::Strangeness;
    }
    SampleKind::Beam
}

/// Why a sample ended in the Failed state
#[derive(Debug, Error)]
pub enum SampleFailure {
    #[error("sample has no stage_name")]
    MissingStageName,

    #[error("Stage '{0}' not found in XML outdirs")]
    UnknownStage(String),

    #[error("sample has no sample_key")]
    MissingSampleKey,

    #[error("Output directory '{0}' is not writable: {1}")]
    OutputNotWritable(PathBuf, String),

    #[error("Cannot remove existing file '{0}': {1}")]
    StaleOutput(PathBuf, String),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),
}

/// Terminal processing state
#[derive(Debug)]
pub enum SampleState {
    /// Inactive entry; no side effects
    Skipped,
    Failed(SampleFailure),
    Completed,
}

/// Beam-monitor reconciliation result of a data sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeamMonitorOutcome {
    pub totals: BeamRunMetrics,
    pub by_run: BTreeMap<i64, BeamRunMetrics>,
    /// False when the store could not be opened or queried
    pub store_available: bool,
}

/// Trigger reconciliation and prescale result of an EXT sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtTriggerOutcome {
    /// Raw `EXTTrig` sum from the trigger store
    pub raw_total: i64,
    pub by_run_raw: BTreeMap<i64, i64>,
    pub prescaled: PrescaledTriggers,
    pub store_available: bool,
}

/// Type-specific metrics of a Completed sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleMetrics {
    /// MC and detector variations
    McLike { pot: f64, pot_eff: f64 },
    Data {
        pot: f64,
        pot_eff: f64,
        beam: BeamMonitorOutcome,
    },
    Ext {
        /// Nominal trigger count from the recipe
        trig: i64,
        triggers: ExtTriggerOutcome,
    },
    Dirt { pot: f64 },
}

/// Bookkeeping fields written to the catalogue record
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PublicMetrics {
    pub pot: f64,
    pub pot_eff: f64,
    pub trig: i64,
    pub trig_eff: i64,
}

impl SampleMetrics {
    pub fn public(&self) -> PublicMetrics {
        match self {
            SampleMetrics::McLike { pot, pot_eff } | SampleMetrics::Data { pot, pot_eff, .. } => {
                PublicMetrics {
                    pot: *pot,
                    pot_eff: *pot_eff,
                    ..PublicMetrics::default()
                }
            }
            SampleMetrics::Ext { trig, triggers } => PublicMetrics {
                trig: *trig,
                trig_eff: triggers.raw_total,
                ..PublicMetrics::default()
            },
            SampleMetrics::Dirt { pot } => PublicMetrics {
                pot: *pot,
                ..PublicMetrics::default()
            },
        }
    }
}

/// Result of running one entry (sample or detector variation) through the processor
#[derive(Debug)]
pub struct SampleOutcome {
    pub state: SampleState,
    /// Merged artifact path (set once the sample completes)
    pub file: Option<PathBuf>,
    pub pairs: BTreeSet<RunSubrun>,
    pub metrics: Option<SampleMetrics>,
}

impl SampleOutcome {
    pub fn skipped() -> Self {
        Self {
            state: SampleState::Skipped,
            file: None,
            pairs: BTreeSet::new(),
            metrics: None,
        }
    }

    pub fn failed(failure: SampleFailure) -> Self {
        Self {
            state: SampleState::Failed(failure),
            file: None,
            pairs: BTreeSet::new(),
            metrics: None,
        }
    }

    pub fn completed(file: PathBuf, pairs: BTreeSet<RunSubrun>, metrics: SampleMetrics) -> Self {
        Self {
            state: SampleState::Completed,
            file: Some(file),
            pairs,
            metrics: Some(metrics),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, SampleState::Completed)
    }
}

#[derive(Debug)]
pub struct ProcessedVariation {
    pub recipe: RecipeSample,
    pub outcome: SampleOutcome,
}

/// A sample entry after phase one, ready for period scaling
#[derive(Debug)]
pub struct ProcessedSample {
    pub recipe: RecipeSample,
    pub kind: SampleKind,
    pub outcome: SampleOutcome,
    pub variations: Vec<ProcessedVariation>,
}

/// Equivalent exposure assigned to an EXT sample by period scaling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtScaling {
    pub pot_equiv: f64,
    pub components: PotEquivComponents,
    pub numi_by_run_ref: BTreeMap<i64, BeamRunMetrics>,
}

/// Computed fields that replace same-named recipe keys
const COMPUTED_KEYS: [&str; 12] = [
    "file",
    "pot",
    "pot_eff",
    "trig",
    "trig_eff",
    "kind",
    "detvars",
    "pot_equiv",
    "pot_equiv_components",
    "ext_prescale_details",
    "ext_by_run_raw",
    "numi_by_run_ref",
];

impl ProcessedSample {
    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }

    pub fn beam_monitor(&self) -> Option<&BeamMonitorOutcome> {
        match &self.outcome.metrics {
            Some(SampleMetrics::Data { beam, .. }) => Some(beam),
            _ => None,
        }
    }

    pub fn ext_triggers(&self) -> Option<&ExtTriggerOutcome> {
        match &self.outcome.metrics {
            Some(SampleMetrics::Ext { triggers, .. }) => Some(triggers),
            _ => None,
        }
    }

    /// Public catalogue record; recipe-internal keys and working state are dropped
    pub fn into_record(self, scaling: Option<ExtScaling>) -> CatalogueSample {
        let mut extra = self.recipe.extra;
        let mut record = CatalogueSample::new(self.kind, serde_json::Map::new(), self.recipe.active);

        if let (SampleState::Completed, Some(metrics)) = (&self.outcome.state, &self.outcome.metrics) {
            let public = metrics.public();
            record.file = self.outcome.file.as_ref().map(|p| p.display().to_string());
            record.pot = Some(public.pot);
            record.pot_eff = Some(public.pot_eff);
            record.trig = Some(public.trig);
            record.trig_eff = Some(public.trig_eff);

            if let (SampleMetrics::Ext { triggers, .. }, Some(scaling)) = (metrics, scaling) {
                record.pot_equiv = Some(scaling.pot_equiv);
                record.pot_equiv_components = Some(scaling.components);
                record.ext_prescale_details = Some(triggers.prescaled.details.clone());
                record.ext_by_run_raw = Some(triggers.by_run_raw.clone());
                record.numi_by_run_ref = Some(scaling.numi_by_run_ref);
            }
        }

        if !self.variations.is_empty() {
            let detvars: IndexMap<String, DetvarRecord> = self
                .variations
                .iter()
                .enumerate()
                .map(|(position, variation)| {
                    (variation.recipe.variation_tag(position), variation.detvar_record())
                })
                .collect();
            record.detvars = Some(detvars);
        }

        for key in COMPUTED_KEYS {
            extra.remove(key);
        }
        record.extra = extra;
        record
    }
}

impl ProcessedVariation {
    fn detvar_record(&self) -> DetvarRecord {
        match (&self.outcome.state, &self.outcome.metrics) {
            (SampleState::Completed, Some(metrics)) => {
                let public = metrics.public();
                DetvarRecord {
                    file: self.outcome.file.as_ref().map(|p| p.display().to_string()),
                    pot: Some(public.pot),
                    pot_eff: Some(public.pot_eff),
                    trig: Some(public.trig),
                    trig_eff: Some(public.trig_eff),
                }
            }
            _ => DetvarRecord::default(),
        }
    }
}
