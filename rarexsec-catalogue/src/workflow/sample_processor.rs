//! Per-sample processing
//!
//! Drives one sample entry (and its detector variations) through merge, POT
//! accumulation, identifier extraction and store reconciliation, ending in a terminal
//! [`SampleState`](crate::models::SampleState).
//!
//! # Failure handling
//! - Stage lookup, output preparation and merge failures mark the entry Failed
//! - Unreadable event files contribute zero POT / no identifiers
//! - Store failures leave the affected metrics at zero and flag them as degraded

use crate::db::{BeamMonitorStore, TriggerStore};
use crate::models::{
    classify, BeamMonitorOutcome, ExtTriggerOutcome, ProcessedSample, ProcessedVariation,
    SampleFailure, SampleMetrics, SampleOutcome, SampleType,
};
use crate::services::{
    DirectoryListingCache, EventFileReader, FileMerger, IdentifierExtractor, PotAccumulator,
    PotCache, PrescaleCorrector, PrescaleService, StageOutdirs,
};
use rarexsec_common::recipe::RecipeSample;
use rarexsec_common::RunSubrun;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Missing (run, subrun) pairs shown in the EXT diagnostics
const MISSING_PAIRS_SHOWN: usize = 5;

/// Nominal exposure of the period a sample belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodContext {
    /// Nominal POT (0 for off-beam periods)
    pub nominal_pot: f64,
    /// Nominal EXT trigger count (0 for on-beam periods)
    pub nominal_triggers: i64,
}

/// Filesystem and store locations for one run of the processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Directory receiving `<sample_key>.root` artifacts
    pub output_dir: PathBuf,
    pub jobs: usize,
    pub run_db: PathBuf,
    pub numi_db: PathBuf,
}

/// Sample processor
pub struct SampleProcessor {
    stage_outdirs: StageOutdirs,
    listings: Arc<DirectoryListingCache>,
    merger: Arc<dyn FileMerger>,
    extractor: IdentifierExtractor,
    pot: PotAccumulator,
    trigger_store: TriggerStore,
    beam_store: BeamMonitorStore,
    prescale: PrescaleCorrector,
    output_dir: PathBuf,
    jobs: usize,
}

impl SampleProcessor {
    pub fn new(
        config: ProcessorConfig,
        stage_outdirs: StageOutdirs,
        merger: Arc<dyn FileMerger>,
        reader: Arc<dyn EventFileReader>,
        prescale_service: Arc<dyn PrescaleService>,
    ) -> Self {
        Self {
            stage_outdirs,
            listings: Arc::new(DirectoryListingCache::new()),
            merger,
            extractor: IdentifierExtractor::new(Arc::clone(&reader)),
            pot: PotAccumulator::new(reader, Arc::new(PotCache::new())),
            trigger_store: TriggerStore::new(config.run_db),
            beam_store: BeamMonitorStore::new(config.numi_db),
            prescale: PrescaleCorrector::new(prescale_service),
            output_dir: config.output_dir,
            jobs: config.jobs.max(1),
        }
    }

    /// Share caches across processors (e.g. repeated runs in one process)
    pub fn with_caches(mut self, listings: Arc<DirectoryListingCache>, pot_cache: Arc<PotCache>) -> Self {
        self.listings = listings;
        self.pot = self.pot.with_cache(pot_cache);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process a sample entry; its detector variations run only if it completed
    pub async fn process_sample(&self, sample: &RecipeSample, ctx: &PeriodContext) -> ProcessedSample {
        let kind = classify(sample);
        let sample_type = SampleType::from_recipe(sample.sample_type.as_deref());
        let outcome = self.process_entry(sample, sample_type, false, ctx).await;

        let mut variations = Vec::with_capacity(sample.detector_variations.len());
        for variation in &sample.detector_variations {
            let outcome = if outcome.is_completed() {
                let variation_type = SampleType::from_recipe(variation.sample_type.as_deref());
                self.process_entry(variation, variation_type, true, ctx).await
            } else {
                SampleOutcome::skipped()
            };
            variations.push(ProcessedVariation {
                recipe: variation.clone(),
                outcome,
            });
        }

        ProcessedSample {
            recipe: sample.clone(),
            kind,
            outcome,
            variations,
        }
    }

    async fn process_entry(
        &self,
        entry: &RecipeSample,
        sample_type: SampleType,
        is_detvar: bool,
        ctx: &PeriodContext,
    ) -> SampleOutcome {
        let label = if is_detvar { "detector variation" } else { "sample" };
        let sample_key = entry.display_key();
        let stage = entry.stage_name.as_deref().unwrap_or("");

        if !entry.is_active() {
            tracing::info!(sample_key, "Skipping {} (marked as inactive)", label);
            return SampleOutcome::skipped();
        }

        tracing::info!(sample_key, stage, "Processing {}", label);

        match self.run_entry(entry, sample_type, is_detvar, ctx).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::error!(sample_key, stage, "{} failed: {}", label, failure);
                SampleOutcome::failed(failure)
            }
        }
    }

    async fn run_entry(
        &self,
        entry: &RecipeSample,
        sample_type: SampleType,
        is_detvar: bool,
        ctx: &PeriodContext,
    ) -> Result<SampleOutcome, SampleFailure> {
        let stage = entry
            .stage_name
            .as_deref()
            .ok_or(SampleFailure::MissingStageName)?;
        let input_dir = self
            .stage_outdirs
            .resolve(stage)
            .ok_or_else(|| SampleFailure::UnknownStage(stage.to_string()))?;
        let sample_key = entry
            .sample_key
            .as_deref()
            .ok_or(SampleFailure::MissingSampleKey)?;

        let output_file = self.output_dir.join(format!("{}.root", sample_key));
        prepare_output(&output_file)?;

        let raw_files = self.listings.list(input_dir);
        let merged = if raw_files.is_empty() {
            tracing::warn!(
                sample_key,
                input_dir = %input_dir.display(),
                "No ROOT files found, merge skipped; recording metadata only"
            );
            None
        } else {
            let report = self.merger.merge(&output_file, &raw_files).await?;
            (report.executed && output_file.is_file()).then(|| output_file.clone())
        };

        let pot_eff = if is_detvar || matches!(sample_type, SampleType::Mc | SampleType::Data) {
            match &merged {
                Some(file) => self.pot.sum_parallel(std::slice::from_ref(file), self.jobs).await,
                None => self.pot.sum_streaming(&raw_files).await,
            }
        } else {
            0.0
        };

        let pair_sources: Vec<PathBuf> = match &merged {
            Some(file) => vec![file.clone()],
            None => raw_files.to_vec(),
        };
        let pairs = self.extract_pairs(pair_sources).await;

        let metrics = if is_detvar {
            SampleMetrics::McLike {
                pot: ctx.nominal_pot,
                pot_eff,
            }
        } else {
            match sample_type {
                SampleType::Mc => SampleMetrics::McLike {
                    pot: ctx.nominal_pot,
                    pot_eff,
                },
                SampleType::Dirt => SampleMetrics::Dirt {
                    pot: ctx.nominal_pot,
                },
                SampleType::Data => SampleMetrics::Data {
                    pot: ctx.nominal_pot,
                    pot_eff,
                    beam: self.reconcile_beam(sample_key, &pairs).await,
                },
                SampleType::Ext => SampleMetrics::Ext {
                    trig: ctx.nominal_triggers,
                    triggers: self.reconcile_triggers(sample_key, &pairs).await,
                },
            }
        };

        Ok(SampleOutcome::completed(output_file, pairs, metrics))
    }

    async fn extract_pairs(&self, files: Vec<PathBuf>) -> BTreeSet<RunSubrun> {
        if files.is_empty() {
            return BTreeSet::new();
        }
        let extractor = self.extractor.clone();
        match tokio::task::spawn_blocking(move || extractor.extract_files(&files)).await {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::warn!("Identifier extraction task failed: {}", e);
                BTreeSet::new()
            }
        }
    }

    async fn reconcile_triggers(&self, sample_key: &str, pairs: &BTreeSet<RunSubrun>) -> ExtTriggerOutcome {
        let sums = match self.trigger_store.sum_ext_triggers(pairs).await {
            Ok(sums) => sums,
            Err(e) => {
                tracing::error!(
                    sample_key,
                    store = %self.trigger_store.path().display(),
                    "EXT trigger reconciliation failed, trigger fields left at zero: {}",
                    e
                );
                return ExtTriggerOutcome::default();
            }
        };

        let prescaled = self.prescale.apply(&sums.by_run).await;

        tracing::info!(sample_key, "EXT triggers (raw, from run.db): {}", sums.total);
        if !self.prescale.service_available() {
            tracing::warn!(
                sample_key,
                "Prescale service not available -> EXT prescale not applied (using prescale=1.0)"
            );
        }
        tracing::info!(sample_key, "EXT triggers (prescaled): {:.3}", prescaled.total);
        if !sums.missing.is_empty() {
            tracing::info!(
                sample_key,
                "{} (run,subrun) pairs in EXT files not found in run.db (showing up to {}): {}",
                sums.missing.len(),
                MISSING_PAIRS_SHOWN,
                sums.missing
                    .iter()
                    .take(MISSING_PAIRS_SHOWN)
                    .map(RunSubrun::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        ExtTriggerOutcome {
            raw_total: sums.total,
            by_run_raw: sums.by_run,
            prescaled,
            store_available: true,
        }
    }

    async fn reconcile_beam(&self, sample_key: &str, pairs: &BTreeSet<RunSubrun>) -> BeamMonitorOutcome {
        match self.beam_store.sum_metrics(pairs).await {
            Ok(sums) => {
                tracing::info!(
                    sample_key,
                    missing = sums.missing.len(),
                    "DATA NuMI metrics: EA9CNT_wcut={:.3}, tortgt_wcut={:.3}",
                    sums.totals.ea9_wcut,
                    sums.totals.tortgt_wcut
                );
                BeamMonitorOutcome {
                    totals: sums.totals,
                    by_run: sums.by_run,
                    store_available: true,
                }
            }
            Err(e) => {
                tracing::error!(
                    sample_key,
                    store = %self.beam_store.path().display(),
                    "Beam-monitor reconciliation failed, metrics left at zero: {}",
                    e
                );
                BeamMonitorOutcome::default()
            }
        }
    }
}

/// Ensure the output directory exists and is writable, and remove a stale artifact
fn prepare_output(output_file: &Path) -> Result<(), SampleFailure> {
    let dir = output_file.parent().unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir)
        .map_err(|e| SampleFailure::OutputNotWritable(dir.to_path_buf(), e.to_string()))?;

    let marker = dir.join(format!(".write-check-{}", std::process::id()));
    std::fs::File::create(&marker)
        .and_then(|_| std::fs::remove_file(&marker))
        .map_err(|e| SampleFailure::OutputNotWritable(dir.to_path_buf(), e.to_string()))?;

    if output_file.exists() {
        std::fs::remove_file(output_file)
            .map_err(|e| SampleFailure::StaleOutput(output_file.to_path_buf(), e.to_string()))?;
    }
    Ok(())
}
