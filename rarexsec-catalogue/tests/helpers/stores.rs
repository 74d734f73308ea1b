//! SQLite lookup-store fixtures

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use std::path::Path;

/// `runinfo(run, subrun, EXTTrig)` store
pub async fn create_runinfo_db(path: &Path, rows: &[(i64, i64, i64)]) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .unwrap();
    sqlx::query("CREATE TABLE runinfo (run INTEGER, subrun INTEGER, EXTTrig INTEGER, gate1_trig INTEGER)")
        .execute(&mut conn)
        .await
        .unwrap();
    for (run, subrun, ext) in rows {
        sqlx::query("INSERT INTO runinfo (run, subrun, EXTTrig, gate1_trig) VALUES (?, ?, ?, 0)")
            .bind(*run)
            .bind(*subrun)
            .bind(*ext)
            .execute(&mut conn)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
}

/// `numi(run, subrun, EA9CNT_wcut, tortgt_wcut)` store
pub async fn create_numi_db(path: &Path, rows: &[(i64, i64, f64, f64)]) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .unwrap();
    sqlx::query("CREATE TABLE numi (run INTEGER, subrun INTEGER, EA9CNT_wcut REAL, tortgt_wcut REAL)")
        .execute(&mut conn)
        .await
        .unwrap();
    for (run, subrun, ea9, tortgt) in rows {
        sqlx::query("INSERT INTO numi (run, subrun, EA9CNT_wcut, tortgt_wcut) VALUES (?, ?, ?, ?)")
            .bind(*run)
            .bind(*subrun)
            .bind(*ea9)
            .bind(*tortgt)
            .execute(&mut conn)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
}
