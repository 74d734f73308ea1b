//! Trigger-count reconciliation against `run.db`

use super::{load_pairs, missing_pairs, open_lookup_store, StoreError};
use rarexsec_common::RunSubrun;
use sqlx::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Raw EXT trigger sums for a pair set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSums {
    pub total: i64,
    pub by_run: BTreeMap<i64, i64>,
    /// Input pairs with no `runinfo` row
    pub missing: Vec<RunSubrun>,
}

/// Trigger-count store (`runinfo` table: run, subrun, EXTTrig, ...)
#[derive(Debug, Clone)]
pub struct TriggerStore {
    path: PathBuf,
}

impl TriggerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sum `EXTTrig` over the matched pairs; an empty pair set never opens the store
    pub async fn sum_ext_triggers(&self, pairs: &BTreeSet<RunSubrun>) -> Result<TriggerSums, StoreError> {
        if pairs.is_empty() {
            return Ok(TriggerSums::default());
        }

        let mut conn = open_lookup_store(&self.path).await?;
        load_pairs(&mut conn, pairs).await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT CAST(IFNULL(SUM(r.EXTTrig), 0) AS INTEGER)
            FROM runinfo r
            JOIN pairs p ON r.run = p.run AND r.subrun = p.subrun
            "#,
        )
        .fetch_one(&mut conn)
        .await?;

        let by_run: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT r.run, CAST(IFNULL(SUM(r.EXTTrig), 0) AS INTEGER)
            FROM runinfo r
            JOIN pairs p ON r.run = p.run AND r.subrun = p.subrun
            GROUP BY r.run
            ORDER BY r.run
            "#,
        )
        .fetch_all(&mut conn)
        .await?;

        let missing = missing_pairs(&mut conn, "runinfo").await?;

        if let Err(e) = conn.close().await {
            tracing::debug!("Closing trigger store connection: {}", e);
        }

        tracing::debug!(
            pairs = pairs.len(),
            total,
            missing = missing.len(),
            "Reconciled pairs against trigger store"
        );

        Ok(TriggerSums {
            total,
            by_run: by_run.into_iter().collect(),
            missing,
        })
    }
}
