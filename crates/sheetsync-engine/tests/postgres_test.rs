//! Loader, ledger, transform and export against a real PostgreSQL
//!
//! These tests start a container and are marked with #[ignore]. Run them
//! explicitly with:
//!
//! ```bash
//! cargo test -p sheetsync-engine --test postgres_test -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{init_tracing, FakeSheetSource, TestPostgres};
use serial_test::serial;
use sheetsync_common::naming::ColumnName;
use sheetsync_common::types::{RunMode, RunStatus, TableOutcome};
use sheetsync_engine::db::PgRunLedger;
use sheetsync_engine::export::Exporter;
use sheetsync_engine::extract::{ExtractedTable, RetryPolicy, SourceRow};
use sheetsync_engine::ledger::{RunLedger, RunRecord, TableStat};
use sheetsync_engine::load::{PgTargetStore, TargetStore};
use sheetsync_engine::sources::{ExportConfig, KeyColumn};
use sheetsync_engine::sync::{prepare_rows, reconcile};
use sheetsync_engine::transform::TransformRunner;
use sheetsync_engine::validate::{Violation, ViolationKind};
use std::sync::Arc;
use std::time::Duration;

fn extracted(table: &str, rows: &[(&str, &str)]) -> ExtractedTable {
    ExtractedTable {
        table: table.to_string(),
        columns: vec![ColumnName::parse("id").unwrap(), ColumnName::parse("name").unwrap()],
        rows: rows
            .iter()
            .enumerate()
            .map(|(i, (id, name))| SourceRow {
                row_index: i as i32 + 2,
                values: vec![Some(id.to_string()), Some(name.to_string())],
            })
            .collect(),
    }
}

async fn table_contents(pool: &sqlx::PgPool, table: &str) -> Vec<(String, String, i32)> {
    sqlx::query_as::<_, (String, String, i32)>(&format!(
        "SELECT id, name, _row_index FROM {} ORDER BY id",
        table
    ))
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_full_reload_is_idempotent() {
    init_tracing();
    let pg = TestPostgres::start().await.unwrap();
    sqlx::query("CREATE SCHEMA stg").execute(pg.pool()).await.unwrap();

    let store = PgTargetStore::new(pg.pool_clone()).with_statement_timeout(Some(Duration::from_secs(30)));
    let table = extracted("stg.clients", &[("1", "Anna"), ("2", "Boris")]);
    store.recreate_table("stg.clients", &table.columns).await.unwrap();

    let rows = prepare_rows(&table, &KeyColumn::Fingerprint, &[]).unwrap();
    let first = store.full_reload("stg.clients", &table.columns, &rows).await.unwrap();
    let after_first = table_contents(pg.pool(), "stg.clients").await;
    let second = store.full_reload("stg.clients", &table.columns, &rows).await.unwrap();
    let after_second = table_contents(pg.pool(), "stg.clients").await;

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 2);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first[1], ("2".to_string(), "Boris".to_string(), 3));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_change_set_round() {
    let pg = TestPostgres::start().await.unwrap();
    let store = PgTargetStore::new(pg.pool_clone()).with_batch_size(1);
    let key = KeyColumn::Column(ColumnName::parse("id").unwrap());

    // Missing table reads as empty prior state
    assert!(store.prior_state("clients", &key).await.unwrap().is_empty());

    let initial = extracted("clients", &[("1", "Anna"), ("2", "Boris"), ("3", "Vera")]);
    store.recreate_table("clients", &initial.columns).await.unwrap();
    let changes = reconcile(
        store.prior_state("clients", &key).await.unwrap(),
        prepare_rows(&initial, &key, &[]).unwrap(),
    );
    let loaded = store
        .apply_change_set("clients", &initial.columns, &changes, &key)
        .await
        .unwrap();
    assert_eq!(loaded.inserted, 3);

    let next = extracted("clients", &[("1", "Anna K"), ("3", "Vera"), ("4", "Gleb")]);
    let prior = store.prior_state("clients", &key).await.unwrap();
    assert_eq!(prior.len(), 3);

    let changes = reconcile(prior, prepare_rows(&next, &key, &[]).unwrap());
    let loaded = store
        .apply_change_set("clients", &next.columns, &changes, &key)
        .await
        .unwrap();
    assert_eq!((loaded.inserted, loaded.updated, loaded.deleted), (1, 1, 1));
    assert_eq!(changes.unchanged, 1);

    let contents = table_contents(pg.pool(), "clients").await;
    assert_eq!(
        contents,
        vec![
            ("1".to_string(), "Anna K".to_string(), 2),
            // Unchanged rows keep their stored position
            ("3".to_string(), "Vera".to_string(), 4),
            ("4".to_string(), "Gleb".to_string(), 4),
        ]
    );
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_padded_keys_survive_change_sets() {
    let pg = TestPostgres::start().await.unwrap();
    let store = PgTargetStore::new(pg.pool_clone());
    let key = KeyColumn::Column(ColumnName::parse("id").unwrap());

    let initial = extracted("clients", &[("1\u{a0}", "Anna"), ("\t2", "Boris")]);
    store.recreate_table("clients", &initial.columns).await.unwrap();
    let rows = prepare_rows(&initial, &key, &[]).unwrap();
    store.full_reload("clients", &initial.columns, &rows).await.unwrap();

    let mut prior: Vec<String> = store.prior_state("clients", &key).await.unwrap().into_keys().collect();
    prior.sort();
    assert_eq!(prior, vec!["1".to_string(), "2".to_string()]);

    // Same sheet again: nothing moves
    let changes = reconcile(
        store.prior_state("clients", &key).await.unwrap(),
        prepare_rows(&initial, &key, &[]).unwrap(),
    );
    assert_eq!(changes.unchanged, 2);
    assert!(changes.is_empty());

    // Padding dropped in the sheet and one name edited
    let next = extracted("clients", &[("1", "Anna K"), ("2", "Boris")]);
    let changes = reconcile(
        store.prior_state("clients", &key).await.unwrap(),
        prepare_rows(&next, &key, &[]).unwrap(),
    );
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());
    store
        .apply_change_set("clients", &next.columns, &changes, &key)
        .await
        .unwrap();

    let names: Vec<String> = table_contents(pg.pool(), "clients")
        .await
        .into_iter()
        .map(|(_, name, _)| name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Anna K".to_string()));
    assert!(names.contains(&"Boris".to_string()));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_ledger_round_trip() {
    let pg = TestPostgres::start().await.unwrap();
    let ledger = PgRunLedger::new(pg.pool_clone());

    let mut record = RunRecord::start(RunMode::Cdc);
    ledger.start_run(&record).await.unwrap();

    let mut stat = TableStat::new(record.run_id, "stg.visits");
    stat.outcome = TableOutcome::Aborted;
    stat.rows_extracted = 30;
    stat.validation_errors = 25;
    stat.error_message = Some("too many violations".into());
    ledger.record_table(&stat).await.unwrap();
    record.absorb(&stat);

    let violations: Vec<Violation> = (0..25)
        .map(|i| Violation {
            row_index: i + 2,
            column: "date".into(),
            value: "я".repeat(300),
            kind: ViolationKind::InvalidDate,
            message: "bad date".into(),
        })
        .collect();
    ledger
        .log_violations(record.run_id, "stg.visits", &violations)
        .await
        .unwrap();

    let raw = extracted("stg.visits", &[("1", "Анна"), ("2", "Boris")]);
    ledger.dump_raw(record.run_id, "sid", &raw).await.unwrap();

    record.finish(RunStatus::Failed, Some("1 of 1 tables failed: stg.visits".into()));
    ledger.finish_run(&record).await.unwrap();

    let (status, errors, message): (String, i32, Option<String>) =
        sqlx::query_as("SELECT status, validation_errors, error_message FROM runs WHERE run_id = $1")
            .bind(record.run_id)
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(status, "failed");
    assert_eq!(errors, 25);
    assert!(message.unwrap().contains("stg.visits"));

    let (logged, longest): (i64, Option<i32>) = sqlx::query_as(
        "SELECT count(*), max(char_length(invalid_value)) FROM validation_logs WHERE run_id = $1",
    )
    .bind(record.run_id)
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert_eq!(logged, 25);
    assert_eq!(longest, Some(255));

    let (sheet, data): (String, serde_json::Value) =
        sqlx::query_as("SELECT sheet_name, data FROM raw.sheets_dump WHERE run_id = $1")
            .bind(record.run_id)
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(sheet, "stg.visits");
    assert_eq!(data, serde_json::json!([{"id": "1", "name": "Анна"}, {"id": "2", "name": "Boris"}]));

    // Fresh dumps are inside any retention window
    let (removed,): (i32,) = sqlx::query_as("SELECT raw.cleanup_old_dumps()")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_transforms_continue_after_failure() {
    let pg = TestPostgres::start().await.unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("01_broken.sql"), "SELECT * FROM no_such_table;").unwrap();
    std::fs::write(
        dir.path().join("02_mart.sql"),
        "CREATE TABLE mart_totals AS SELECT 1 AS total; INSERT INTO mart_totals VALUES (2);",
    )
    .unwrap();

    let report = TransformRunner::new(pg.pool_clone(), dir.path()).run().await.unwrap();
    assert_eq!(report.executed, vec!["02_mart.sql"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "01_broken.sql");

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM mart_totals")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_export_view_to_sheet() {
    let pg = TestPostgres::start().await.unwrap();
    sqlx::raw_sql(
        r#"
        CREATE SCHEMA mart;
        CREATE VIEW mart.daily AS
        SELECT 'Анна'::text AS manager,
               1500.5::numeric AS total,
               timestamptz '2026-03-01 09:05:00+00' AS closed_at;
        "#,
    )
    .execute(pg.pool())
    .await
    .unwrap();

    let sheets = Arc::new(FakeSheetSource::new());
    sheets.set_tab(9, "Report", Vec::new());
    let exporter = Exporter::new(pg.pool_clone(), sheets.clone(), RetryPolicy::none());

    let export: ExportConfig =
        serde_yaml::from_str("view: mart.daily\nspreadsheet_id: sid\ngid: 9").unwrap();
    let written = exporter.export(&export).await.unwrap();
    assert_eq!(written, 1);

    let writes = sheets.writes.lock().unwrap();
    let (range, grid) = &writes[0];
    assert_eq!(range, "'Report'!A1");
    assert_eq!(grid[0], vec![serde_json::json!("manager"), serde_json::json!("total"), serde_json::json!("closed_at")]);
    assert_eq!(grid[1][0], serde_json::json!("Анна"));
    assert_eq!(grid[1][2], serde_json::json!("01.03.2026 09:05"));
}
