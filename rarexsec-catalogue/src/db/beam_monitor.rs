//! Beam-monitor reconciliation against the NuMI store

use super::{load_pairs, missing_pairs, open_lookup_store, StoreError};
use rarexsec_common::catalogue::BeamRunMetrics;
use rarexsec_common::RunSubrun;
use sqlx::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Summed `EA9CNT_wcut` / `tortgt_wcut` for a pair set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeamMonitorSums {
    pub totals: BeamRunMetrics,
    pub by_run: BTreeMap<i64, BeamRunMetrics>,
    /// Input pairs with no `numi` row
    pub missing: Vec<RunSubrun>,
}

/// Beam-monitor store (`numi` table: run, subrun, EA9CNT_wcut, tortgt_wcut, ...)
#[derive(Debug, Clone)]
pub struct BeamMonitorStore {
    path: PathBuf,
}

impl BeamMonitorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn sum_metrics(&self, pairs: &BTreeSet<RunSubrun>) -> Result<BeamMonitorSums, StoreError> {
        if pairs.is_empty() {
            return Ok(BeamMonitorSums::default());
        }

        let mut conn = open_lookup_store(&self.path).await?;
        load_pairs(&mut conn, pairs).await?;

        let (ea9_wcut, tortgt_wcut): (f64, f64) = sqlx::query_as(
            r#"
            SELECT CAST(IFNULL(SUM(n.EA9CNT_wcut), 0.0) AS REAL),
                   CAST(IFNULL(SUM(n.tortgt_wcut), 0.0) AS REAL)
            FROM numi n
            JOIN pairs p ON n.run = p.run AND n.subrun = p.subrun
            "#,
        )
        .fetch_one(&mut conn)
        .await?;

        let rows: Vec<(i64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT n.run,
                   CAST(IFNULL(SUM(n.EA9CNT_wcut), 0.0) AS REAL),
                   CAST(IFNULL(SUM(n.tortgt_wcut), 0.0) AS REAL)
            FROM numi n
            JOIN pairs p ON n.run = p.run AND n.subrun = p.subrun
            GROUP BY n.run
            ORDER BY n.run
            "#,
        )
        .fetch_all(&mut conn)
        .await?;

        let missing = missing_pairs(&mut conn, "numi").await?;

        if let Err(e) = conn.close().await {
            tracing::debug!("Closing beam-monitor store connection: {}", e);
        }

        Ok(BeamMonitorSums {
            totals: BeamRunMetrics {
                ea9_wcut,
                tortgt_wcut,
            },
            by_run: rows
                .into_iter()
                .map(|(run, ea9_wcut, tortgt_wcut)| {
                    (
                        run,
                        BeamRunMetrics {
                            ea9_wcut,
                            tortgt_wcut,
                        },
                    )
                })
                .collect(),
            missing,
        })
    }
}
