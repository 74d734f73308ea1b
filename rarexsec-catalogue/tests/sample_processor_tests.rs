//! Sample processor behaviour at the edges: missing stores, dry-run merges, output
//! preparation failures and shared caches

mod helpers;

use helpers::{create_numi_db, create_runinfo_db, subrun_tree, write_event_file, ConcatMerger, JsonEventReader};
use rarexsec_catalogue::models::{SampleFailure, SampleMetrics, SampleState};
use rarexsec_catalogue::services::{
    DirectoryListingCache, FileMerger, PotCache, StageOutdirs, UnavailablePrescaleService,
};
use rarexsec_catalogue::workflow::period_normalizer::{scale_period, TRIGGER_STORE_UNAVAILABLE_NOTE};
use rarexsec_catalogue::workflow::{PeriodContext, ProcessorConfig, SampleProcessor};
use rarexsec_common::recipe::RecipeSample;
use rarexsec_common::RunSubrun;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const MC_CONTEXT: PeriodContext = PeriodContext {
    nominal_pot: 1.0e20,
    nominal_triggers: 0,
};

struct Workspace {
    root: TempDir,
}

impl Workspace {
    async fn new() -> Self {
        let root = TempDir::new().unwrap();
        let raw = root.path().join("raw");
        write_event_file(&raw.join("mc/a.root"), subrun_tree(&[(1, 1)], 2.5e19));
        write_event_file(&raw.join("mc/b.root"), subrun_tree(&[(1, 2)], 1.5e19));
        write_event_file(&raw.join("ext/a.root"), subrun_tree(&[(500, 1), (500, 3)], 0.0));

        create_runinfo_db(&root.path().join("run.db"), &[(500, 1, 100), (500, 3, 60)]).await;
        create_numi_db(&root.path().join("numi_v3.db"), &[(500, 1, 2.0, 10.0)]).await;
        Self { root }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn config(&self, output_dir: PathBuf) -> ProcessorConfig {
        ProcessorConfig {
            output_dir,
            jobs: 2,
            run_db: self.path().join("run.db"),
            numi_db: self.path().join("numi_v3.db"),
        }
    }

    fn stages(&self) -> StageOutdirs {
        let raw = self.path().join("raw");
        vec![
            ("stage_mc".to_string(), raw.join("mc")),
            ("stage_ext".to_string(), raw.join("ext")),
        ]
        .into_iter()
        .collect()
    }

    fn processor(&self, config: ProcessorConfig, merger: Arc<dyn FileMerger>) -> SampleProcessor {
        SampleProcessor::new(
            config,
            self.stages(),
            merger,
            Arc::new(JsonEventReader::default()),
            Arc::new(UnavailablePrescaleService),
        )
    }
}

fn mc_sample() -> RecipeSample {
    serde_json::from_value(json!({"sample_key": "nu_overlay", "sample_type": "mc", "stage_name": "stage_mc"}))
        .unwrap()
}

fn ext_sample() -> RecipeSample {
    serde_json::from_value(json!({"sample_key": "beam_off", "sample_type": "ext", "stage_name": "stage_ext"}))
        .unwrap()
}

fn pot_eff(metrics: &Option<SampleMetrics>) -> f64 {
    metrics.as_ref().unwrap().public().pot_eff
}

#[tokio::test]
async fn test_missing_trigger_store_leaves_ext_triggers_at_zero() {
    let workspace = Workspace::new().await;
    let mut config = workspace.config(workspace.path().join("ntuples"));
    config.run_db = workspace.path().join("absent/run.db");
    let processor = workspace.processor(config, Arc::new(ConcatMerger::default()));

    let ctx = PeriodContext {
        nominal_pot: 0.0,
        nominal_triggers: 5000,
    };
    let processed = processor.process_sample(&ext_sample(), &ctx).await;

    assert!(processed.is_completed());
    assert_eq!(processed.outcome.pairs.len(), 2);
    let triggers = processed.ext_triggers().unwrap();
    assert!(!triggers.store_available);
    assert_eq!(triggers.raw_total, 0);
    assert!(triggers.by_run_raw.is_empty());

    let public = processed.outcome.metrics.as_ref().unwrap().public();
    assert_eq!(public.trig, 5000);
    assert_eq!(public.trig_eff, 0);

    let scalings = scale_period(std::slice::from_ref(&processed));
    let scaling = scalings[0].as_ref().unwrap();
    assert_eq!(scaling.pot_equiv, 0.0);
    assert!(scaling.components.notes.contains(TRIGGER_STORE_UNAVAILABLE_NOTE));
}

#[tokio::test]
async fn test_unexecuted_merge_reads_raw_inputs() {
    let workspace = Workspace::new().await;
    let output_dir = workspace.path().join("ntuples");
    let merger = Arc::new(ConcatMerger::dry_run());
    let processor = workspace.processor(workspace.config(output_dir.clone()), Arc::clone(&merger) as Arc<dyn FileMerger>);

    let processed = processor.process_sample(&mc_sample(), &MC_CONTEXT).await;

    assert!(processed.is_completed());
    assert_eq!(merger.call_count(), 1);
    assert!(!output_dir.join("nu_overlay.root").exists());
    assert_eq!(processed.outcome.file, Some(output_dir.join("nu_overlay.root")));
    assert!((pot_eff(&processed.outcome.metrics) - 4.0e19).abs() < 1.0);

    let expected: BTreeSet<RunSubrun> = [RunSubrun::new(1, 1), RunSubrun::new(1, 2)].into_iter().collect();
    assert_eq!(processed.outcome.pairs, expected);
}

#[tokio::test]
async fn test_output_dir_that_is_a_file_fails_sample() {
    let workspace = Workspace::new().await;
    let blocker = workspace.path().join("ntuples");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let merger = Arc::new(ConcatMerger::default());
    let processor = workspace.processor(workspace.config(blocker.clone()), Arc::clone(&merger) as Arc<dyn FileMerger>);

    let processed = processor.process_sample(&mc_sample(), &MC_CONTEXT).await;

    match &processed.outcome.state {
        SampleState::Failed(SampleFailure::OutputNotWritable(dir, _)) => assert_eq!(dir, &blocker),
        other => panic!("Expected OutputNotWritable, got {:?}", other),
    }
    assert!(processed.outcome.file.is_none());
    assert_eq!(merger.call_count(), 0);
}

#[tokio::test]
async fn test_unremovable_stale_artifact_fails_sample() {
    let workspace = Workspace::new().await;
    let output_dir = workspace.path().join("ntuples");
    let stale = output_dir.join("nu_overlay.root");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("leftover"), b"x").unwrap();
    let merger = Arc::new(ConcatMerger::default());
    let processor = workspace.processor(workspace.config(output_dir), Arc::clone(&merger) as Arc<dyn FileMerger>);

    let processed = processor.process_sample(&mc_sample(), &MC_CONTEXT).await;

    match &processed.outcome.state {
        SampleState::Failed(SampleFailure::StaleOutput(path, _)) => assert_eq!(path, &stale),
        other => panic!("Expected StaleOutput, got {:?}", other),
    }
    assert_eq!(merger.call_count(), 0);
    assert!(stale.join("leftover").is_file());
}

#[tokio::test]
async fn test_shared_caches_reuse_directory_listings() {
    let workspace = Workspace::new().await;
    let listings = Arc::new(DirectoryListingCache::new());
    let pot_cache = Arc::new(PotCache::new());

    let first = workspace
        .processor(workspace.config(workspace.path().join("first")), Arc::new(ConcatMerger::default()))
        .with_caches(Arc::clone(&listings), Arc::clone(&pot_cache));
    let processed = first.process_sample(&mc_sample(), &MC_CONTEXT).await;
    assert!((pot_eff(&processed.outcome.metrics) - 4.0e19).abs() < 1.0);
    assert_eq!(listings.len(), 1);
    assert_eq!(pot_cache.len(), 1);

    // Appears after the listing was cached
    write_event_file(
        &workspace.path().join("raw/mc/c.root"),
        subrun_tree(&[(1, 3)], 1.0e19),
    );

    let shared = workspace
        .processor(workspace.config(workspace.path().join("second")), Arc::new(ConcatMerger::default()))
        .with_caches(Arc::clone(&listings), Arc::clone(&pot_cache));
    let processed = shared.process_sample(&mc_sample(), &MC_CONTEXT).await;
    assert!((pot_eff(&processed.outcome.metrics) - 4.0e19).abs() < 1.0);
    assert_eq!(processed.outcome.pairs.len(), 2);
    assert_eq!(pot_cache.len(), 2);

    let fresh = workspace.processor(workspace.config(workspace.path().join("third")), Arc::new(ConcatMerger::default()));
    let processed = fresh.process_sample(&mc_sample(), &MC_CONTEXT).await;
    assert!((pot_eff(&processed.outcome.metrics) - 5.0e19).abs() < 1.0);
    assert_eq!(processed.outcome.pairs.len(), 3);
}
