//! Lookup store access
//!
//! The trigger-count store (`run.db`, table `runinfo`) and the beam-monitor store
//! (`numi_v3.db`, table `numi`) are both keyed by (run, subrun). Reconciliation loads
//! a sample's pairs into a TEMP table on a single read-only connection and joins
//! against it.

pub mod beam_monitor;
pub mod triggers;

pub use beam_monitor::{BeamMonitorStore, BeamMonitorSums};
pub use triggers::{TriggerStore, TriggerSums};

use rarexsec_common::RunSubrun;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, QueryBuilder, Sqlite};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rows per INSERT when loading pairs (two bound parameters each)
const PAIR_INSERT_CHUNK: usize = 400;

/// Lookup store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot open lookup store {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Lookup store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Open a lookup store read-only
///
/// TEMP tables are per connection, so reconciliation runs on one connection rather
/// than a pool.
pub async fn open_lookup_store(path: &Path) -> Result<SqliteConnection, StoreError> {
    tracing::debug!(path = %path.display(), "Opening lookup store (read-only)");

    SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .create_if_missing(false)
        .connect()
        .await
        .map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Create `temp.pairs(run, subrun)` and fill it with `pairs`
pub async fn load_pairs(
    conn: &mut SqliteConnection,
    pairs: &BTreeSet<RunSubrun>,
) -> Result<(), StoreError> {
    sqlx::query("PRAGMA temp_store=MEMORY").execute(&mut *conn).await?;
    sqlx::query(
        r#"
        CREATE TEMP TABLE pairs (
            run INTEGER NOT NULL,
            subrun INTEGER NOT NULL,
            PRIMARY KEY (run, subrun)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let pairs: Vec<RunSubrun> = pairs.iter().copied().collect();
    for chunk in pairs.chunks(PAIR_INSERT_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO pairs (run, subrun) ");
        builder.push_values(chunk, |mut row, pair| {
            row.push_bind(pair.run()).push_bind(pair.subrun());
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

/// Input pairs with no row in `table`, ordered by (run, subrun)
pub(crate) async fn missing_pairs(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<RunSubrun>, StoreError> {
    let sql = format!(
        r#"
        SELECT p.run, p.subrun
        FROM pairs p
        LEFT JOIN {table} t ON t.run = p.run AND t.subrun = p.subrun
        WHERE t.run IS NULL
        ORDER BY p.run, p.subrun
        "#
    );

    let rows: Vec<(i64, i64)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(RunSubrun::from).collect())
}
