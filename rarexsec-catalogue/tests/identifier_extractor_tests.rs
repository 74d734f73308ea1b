//! Identifier extraction over event files

mod helpers;

use helpers::{subrun_tree, write_event_file, JsonEventReader};
use rarexsec_catalogue::services::IdentifierExtractor;
use rarexsec_common::RunSubrun;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn extractor() -> IdentifierExtractor {
    IdentifierExtractor::new(Arc::new(JsonEventReader::default()))
}

fn set(pairs: &[(i64, i64)]) -> BTreeSet<RunSubrun> {
    pairs.iter().copied().map(RunSubrun::from).collect()
}

#[test]
fn test_candidate_tree_wins_over_later_trees() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.root");
    write_event_file(
        &path,
        json!({
            "nuselection/SubRun": {"run": [1, 1], "subRun": [1, 2]},
            "Events": {"run": [9], "subrun": [9]}
        }),
    );

    assert_eq!(extractor().extract_file(&path), set(&[(1, 1), (1, 2)]));
}

#[test]
fn test_falls_back_to_full_scan_union() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("split.root");
    write_event_file(
        &path,
        json!({
            "analysis/first": {"Run": [7], "SubRun": [1]},
            "analysis/second": {"RUN": [7, 8], "subrun": [2, 1]},
            "analysis/meta": {"run": [3]}
        }),
    );

    assert_eq!(extractor().extract_file(&path), set(&[(7, 1), (7, 2), (8, 1)]));
}

#[test]
fn test_file_without_identifiers_yields_empty_set() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.root");
    write_event_file(&path, json!({"nuselection/SubRun": {"pot": [1.0]}}));

    assert!(extractor().extract_file(&path).is_empty());
}

#[test]
fn test_unreadable_file_yields_empty_set() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.root");
    std::fs::write(&path, b"not an event file").unwrap();

    assert!(extractor().extract_file(&path).is_empty());
    assert!(extractor().extract_file(&dir.path().join("missing.root")).is_empty());
}

#[test]
fn test_union_across_files_ignores_order_and_duplicates() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.root");
    let b = dir.path().join("b.root");
    let bad = dir.path().join("bad.root");
    write_event_file(&a, subrun_tree(&[(5, 1), (5, 2)], 1.0));
    write_event_file(&b, subrun_tree(&[(5, 2), (6, 1)], 1.0));
    std::fs::write(&bad, b"garbage").unwrap();

    let forward = extractor().extract_files(&[a.clone(), bad.clone(), b.clone()]);
    let backward = extractor().extract_files(&[b, bad, a]);

    assert_eq!(forward, set(&[(5, 1), (5, 2), (6, 1)]));
    assert_eq!(forward, backward);
}
