//! Recipe model and validation
//!
//! A recipe is a JSON instance document describing beamlines, their run periods and
//! the samples of each period. Recipe order is preserved throughout (`IndexMap`).

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Required value of the recipe's `role` key
pub const RECIPE_ROLE: &str = "recipe";

/// `recipe_kind` value that marks an uninstantiated template
pub const TEMPLATE_KIND: &str = "template";

/// Top-level recipe document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub role: String,
    #[serde(default = "default_recipe_kind")]
    pub recipe_kind: String,
    /// Directory receiving the merged per-sample artifacts
    pub ntuple_base_directory: PathBuf,
    #[serde(default, alias = "run_configurations")]
    pub beamlines: IndexMap<String, RecipeBeamline>,
}

fn default_recipe_kind() -> String {
    "instance".to_string()
}

fn default_true() -> bool {
    true
}

/// `null` reads as an empty list
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One beamline block: an `active` flag plus named run periods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeBeamline {
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(flatten)]
    pub periods: IndexMap<String, RecipePeriod>,
}

/// One run period
///
/// Everything except `samples` is kept verbatim in `fields` so the catalogue can carry
/// the period's recipe keys through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipePeriod {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub samples: Vec<RecipeSample>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecipePeriod {
    /// Nominal POT: `nominal_pot`, falling back to the legacy `pot` key
    pub fn nominal_pot(&self) -> Option<f64> {
        self.fields
            .get("nominal_pot")
            .or_else(|| self.fields.get("pot"))
            .and_then(Value::as_f64)
    }

    /// Nominal EXT trigger count for off-beam periods
    pub fn ext_triggers(&self) -> Option<i64> {
        self.fields.get("ext_triggers").and_then(|v| {
            v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
        })
    }
}

/// One sample entry (also used for detector-variation sub-entries)
///
/// Keys the pipeline interprets are typed; every other key lands in `extra` and is
/// passed through to the catalogue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_truth_filters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_type: Option<String>,
    /// Raw trigger count knob; recipe-internal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub detector_variations: Vec<RecipeSample>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecipeSample {
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    /// Sample key for log messages
    pub fn display_key(&self) -> &str {
        self.sample_key.as_deref().unwrap_or("UNKNOWN")
    }

    /// Tag under which a detector variation is listed in its parent's `detvars`
    pub fn variation_tag(&self, position: usize) -> String {
        self.variation_type
            .clone()
            .or_else(|| {
                self.extra
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| self.sample_key.clone())
            .unwrap_or_else(|| format!("dv{}", position + 1))
    }
}

impl Recipe {
    /// Parse and validate a recipe document
    ///
    /// Role and kind are checked on the raw document first so a template or a
    /// non-recipe file is rejected before any schema error can mask it.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(content)?;
        validate_role(&raw)?;
        let recipe: Recipe = serde_json::from_value(raw)?;
        Ok(recipe)
    }

    /// Read, parse and validate a recipe file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read recipe {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

fn validate_role(raw: &Value) -> Result<()> {
    let role = raw.get("role").and_then(Value::as_str);
    if role != Some(RECIPE_ROLE) {
        return Err(Error::InvalidRecipe(format!(
            "Expected role='{}', found '{}'",
            RECIPE_ROLE,
            role.unwrap_or("None")
        )));
    }

    let kind = raw
        .get("recipe_kind")
        .and_then(Value::as_str)
        .unwrap_or("instance");
    if kind == TEMPLATE_KIND {
        return Err(Error::InvalidRecipe(
            "Refusing to run on a template. Copy it and set recipe_kind='instance'.".to_string(),
        ));
    }

    Ok(())
}

/// Split a beam key such as `numi_fhc` or `bnb-ext` into (beamline, mode)
///
/// Splits on the first `_`, else the first `-`. Keys without either separator are
/// on-beam data keys.
pub fn split_beam_key(beam_key: &str) -> (String, String) {
    for sep in ['_', '-'] {
        if let Some((beamline, mode)) = beam_key.split_once(sep) {
            return (beamline.to_string(), mode.to_string());
        }
    }
    (beam_key.to_string(), "data".to_string())
}

/// Whether a beam key designates an off-beam (EXT) period
pub fn is_ext_beam(beam_key: &str) -> bool {
    split_beam_key(beam_key).1.eq_ignore_ascii_case("ext")
}
