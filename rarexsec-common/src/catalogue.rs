//! Catalogue model and writer
//!
//! The catalogue is the single output document: `{beamlines: {beam: {period: {...}}}}`.
//! Records here carry only public fields; pipeline working state lives elsewhere and
//! has no path into these types.

use crate::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Classification assigned to every sample record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Data,
    Ext,
    Dirt,
    Strangeness,
    Beam,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleKind::Data => "data",
            SampleKind::Ext => "ext",
            SampleKind::Dirt => "dirt",
            SampleKind::Strangeness => "strangeness",
            SampleKind::Beam => "beam",
        };
        f.write_str(name)
    }
}

/// Summed beam-monitor metrics (total or per run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamRunMetrics {
    pub ea9_wcut: f64,
    pub tortgt_wcut: f64,
}

/// Prescale correction applied to one run of an EXT sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunPrescaleDetail {
    pub raw_exttrig: f64,
    pub prescale: f64,
    pub exttrig_prescaled: f64,
    /// False when the identity factor stood in for a missing service value
    pub prescale_applied: bool,
}

/// Ingredients of an EXT sample's equivalent exposure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PotEquivComponents {
    pub ea9cnt_wcut_ref: f64,
    pub tortgt_wcut_ref: f64,
    pub ext_trig_prescaled: f64,
    pub ext_prescale_applied: bool,
    pub notes: String,
}

/// Detector-variation summary listed under its parent's `detvars`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetvarRecord {
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot_eff: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trig: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trig_eff: Option<i64>,
}

/// One emitted sample record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueSample {
    /// Recipe keys the pipeline does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot_eff: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trig: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trig_eff: Option<i64>,
    pub kind: SampleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detvars: Option<IndexMap<String, DetvarRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot_equiv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot_equiv_components: Option<PotEquivComponents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_prescale_details: Option<BTreeMap<i64, RunPrescaleDetail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_by_run_raw: Option<BTreeMap<i64, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numi_by_run_ref: Option<BTreeMap<i64, BeamRunMetrics>>,
}

impl CatalogueSample {
    /// Bare record with only pass-through keys and a classification
    pub fn new(kind: SampleKind, extra: Map<String, Value>, active: Option<bool>) -> Self {
        Self {
            extra,
            active,
            file: None,
            pot: None,
            pot_eff: None,
            trig: None,
            trig_eff: None,
            kind,
            detvars: None,
            pot_equiv: None,
            pot_equiv_components: None,
            ext_prescale_details: None,
            ext_by_run_raw: None,
            numi_by_run_ref: None,
        }
    }
}

/// One emitted run period: its recipe keys plus processed samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CataloguePeriod {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub samples: Vec<CatalogueSample>,
}

/// The complete catalogue, beam key → period name → period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    pub beamlines: IndexMap<String, IndexMap<String, CataloguePeriod>>,
}

impl Catalogue {
    pub fn insert_period(&mut self, beam_key: &str, period: &str, record: CataloguePeriod) {
        self.beamlines
            .entry(beam_key.to_string())
            .or_default()
            .insert(period.to_string(), record);
    }

    /// Render as pretty JSON with 4-space indentation
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }

    /// Write the catalogue file, creating its directory if needed
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_bytes()?)?;
        Ok(())
    }
}
