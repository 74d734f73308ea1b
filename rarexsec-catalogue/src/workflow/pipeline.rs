//! Catalogue pipeline
//!
//! Walks the recipe in order. Each period runs in two phases: every sample is
//! processed to a terminal state, then EXT samples are scaled against the period's
//! reference data sample and the records are emitted.

use super::period_normalizer::scale_period;
use super::sample_processor::{PeriodContext, ProcessorConfig, SampleProcessor};
use crate::models::SampleState;
use crate::services::{
    FileMerger, HaddMerger, HttpPrescaleService, PrescaleError, PrescaleService, RootFileReader,
    StageOutdirs, UnavailablePrescaleService,
};
use rarexsec_common::catalogue::{Catalogue, CataloguePeriod};
use rarexsec_common::config::Settings;
use rarexsec_common::recipe::{is_ext_beam, Recipe, RecipePeriod};
use std::path::PathBuf;
use std::sync::Arc;

/// Terminal-state counts for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub periods: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    fn record(&mut self, state: &SampleState) {
        match state {
            SampleState::Completed => self.completed += 1,
            SampleState::Failed(_) => self.failed += 1,
            SampleState::Skipped => self.skipped += 1,
        }
    }
}

/// Recipe → catalogue
pub struct CataloguePipeline {
    processor: SampleProcessor,
}

impl CataloguePipeline {
    pub fn new(processor: SampleProcessor) -> Self {
        Self { processor }
    }

    /// Build the catalogue; per-sample failures are recorded, never raised
    pub async fn run(&self, recipe: &Recipe) -> (Catalogue, RunSummary) {
        let mut catalogue = Catalogue::default();
        let mut summary = RunSummary::default();

        for (beam_key, beamline) in &recipe.beamlines {
            if !beamline.active {
                tracing::info!(beam = %beam_key, "Skipping beamline (inactive)");
                continue;
            }

            for (period_name, period) in &beamline.periods {
                tracing::info!(beam = %beam_key, period = %period_name, "Processing period");

                let ctx = period_context(beam_key, period_name, period);

                if period.samples.is_empty() {
                    tracing::info!(beam = %beam_key, period = %period_name, "Skipping period (no samples)");
                    continue;
                }

                // Phase 1: every sample reaches a terminal state
                let mut processed = Vec::with_capacity(period.samples.len());
                for sample in &period.samples {
                    let result = self.processor.process_sample(sample, &ctx).await;
                    summary.record(&result.outcome.state);
                    processed.push(result);
                }

                // Phase 2: period-level EXT scaling
                let scalings = scale_period(&processed);
                let samples = processed
                    .into_iter()
                    .zip(scalings)
                    .map(|(sample, scaling)| sample.into_record(scaling))
                    .collect();

                catalogue.insert_period(
                    beam_key,
                    period_name,
                    CataloguePeriod {
                        fields: period.fields.clone(),
                        samples,
                    },
                );
                summary.periods += 1;
            }
        }

        tracing::info!(
            periods = summary.periods,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Catalogue build finished"
        );

        (catalogue, summary)
    }
}

/// Nominal exposure of a period: POT for on-beam periods, triggers for EXT periods
pub fn period_context(beam_key: &str, period_name: &str, period: &RecipePeriod) -> PeriodContext {
    if is_ext_beam(beam_key) {
        return PeriodContext {
            nominal_pot: 0.0,
            nominal_triggers: period.ext_triggers().unwrap_or(0),
        };
    }

    let nominal_pot = period.nominal_pot().unwrap_or(0.0);
    if nominal_pot == 0.0 {
        tracing::warn!(beam = beam_key, period = period_name, "No nominal POT provided (on-beam)");
    }
    PeriodContext {
        nominal_pot,
        nominal_triggers: 0,
    }
}

/// Prescale service for the configured URL, or the unavailable stand-in
pub fn prescale_service(url: Option<&str>) -> Result<Arc<dyn PrescaleService>, PrescaleError> {
    match url {
        Some(url) => {
            tracing::info!(url, "Using prescale service");
            Ok(Arc::new(HttpPrescaleService::new(url)?))
        }
        None => {
            tracing::info!("No prescale service configured; EXT prescale factors default to 1.0");
            Ok(Arc::new(UnavailablePrescaleService))
        }
    }
}

/// Production wiring: XML stage resolver, `hadd`, ROOT reader, configured stores
pub fn build_pipeline(
    settings: &Settings,
    output_dir: PathBuf,
    dry_run: bool,
) -> Result<CataloguePipeline, PrescaleError> {
    if settings.xml_files.is_empty() {
        tracing::warn!("No project XML files configured; every stage lookup will fail");
    }
    let stage_outdirs = StageOutdirs::from_xml_files(&settings.xml_files);
    tracing::info!(stages = stage_outdirs.len(), "Loaded stage output directories");

    let merger: Arc<dyn FileMerger> = Arc::new(HaddMerger::new(
        settings.jobs,
        settings.scratch_dir.clone(),
        settings.min_free_gb,
        dry_run,
    ));

    let processor = SampleProcessor::new(
        ProcessorConfig {
            output_dir,
            jobs: settings.jobs,
            run_db: settings.run_db.clone(),
            numi_db: settings.numi_db.clone(),
        },
        stage_outdirs,
        merger,
        Arc::new(RootFileReader),
        prescale_service(settings.prescale_url.as_deref())?,
    );

    Ok(CataloguePipeline::new(processor))
}
