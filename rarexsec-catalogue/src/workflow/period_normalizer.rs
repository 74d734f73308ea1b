//! Period-level EXT normalization
//!
//! Runs after every sample of a period is terminal. The first completed data sample
//! is the reference; each completed EXT sample gets
//! `pot_equiv = tortgt_ref × (ea9_ref / triggers)` where `triggers` is its prescaled
//! trigger total, or its raw total when no prescale could be applied.

use crate::models::{ExtScaling, ProcessedSample};
use rarexsec_common::catalogue::{BeamRunMetrics, PotEquivComponents, SampleKind};
use std::collections::BTreeMap;

pub const PRESCALE_FALLBACK_NOTE: &str = "prescale_missing_fallback_to_raw_EXTTrig";
pub const TRIGGER_STORE_UNAVAILABLE_NOTE: &str = "trigger_store_unavailable";

/// Equivalent exposure; zero unless all three ingredients are positive
pub fn pot_equiv(ea9_ref: f64, tortgt_ref: f64, triggers: f64) -> f64 {
    if ea9_ref > 0.0 && triggers > 0.0 && tortgt_ref > 0.0 {
        tortgt_ref * (ea9_ref / triggers)
    } else {
        0.0
    }
}

/// First completed data-kind sample in recipe order
pub fn select_reference(samples: &[ProcessedSample]) -> Option<&ProcessedSample> {
    let mut candidates = samples
        .iter()
        .filter(|s| s.kind == SampleKind::Data && s.is_completed());
    let reference = candidates.next()?;

    let others = candidates.count();
    if others > 0 {
        tracing::warn!(
            reference = reference.recipe.display_key(),
            others,
            "Period has several data samples; using the first as reference"
        );
    }
    Some(reference)
}

/// Scaling for each sample, index-aligned with `samples`; `None` for non-EXT or
/// incomplete samples
pub fn scale_period(samples: &[ProcessedSample]) -> Vec<Option<ExtScaling>> {
    let reference = select_reference(samples);
    let (ref_totals, numi_by_run_ref) = match reference.and_then(ProcessedSample::beam_monitor) {
        Some(beam) => (beam.totals, beam.by_run.clone()),
        None => (BeamRunMetrics::default(), BTreeMap::new()),
    };

    samples
        .iter()
        .map(|sample| {
            if sample.kind != SampleKind::Ext || !sample.is_completed() {
                return None;
            }
            let triggers = sample.ext_triggers()?;

            let mut notes = Vec::new();
            let mut denominator = triggers.prescaled.total;
            if denominator <= 0.0 {
                denominator = triggers.raw_total as f64;
                notes.push(PRESCALE_FALLBACK_NOTE);
            }
            if !triggers.store_available {
                notes.push(TRIGGER_STORE_UNAVAILABLE_NOTE);
            }

            let value = pot_equiv(ref_totals.ea9_wcut, ref_totals.tortgt_wcut, denominator);
            tracing::info!(
                sample_key = sample.recipe.display_key(),
                reference = reference.map(|r| r.recipe.display_key()).unwrap_or("none"),
                "EXT POT-equivalent: {:.6e}",
                value
            );

            Some(ExtScaling {
                pot_equiv: value,
                components: PotEquivComponents {
                    ea9cnt_wcut_ref: ref_totals.ea9_wcut,
                    tortgt_wcut_ref: ref_totals.tortgt_wcut,
                    ext_trig_prescaled: denominator,
                    ext_prescale_applied: triggers.prescaled.any_applied,
                    notes: notes.join(";"),
                },
                numi_by_run_ref: numi_by_run_ref.clone(),
            })
        })
        .collect()
}
