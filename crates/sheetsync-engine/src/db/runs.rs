//! PostgreSQL-backed run ledger (`runs`, `table_stats`, `validation_logs`,
//! `raw.sheets_dump`)

use crate::error::Result;
use crate::extract::ExtractedTable;
use crate::ledger::{RunLedger, RunRecord, TableStat};
use crate::validate::Violation;
use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

/// `validation_logs.invalid_value` column width
pub const MAX_LOGGED_VALUE_CHARS: usize = 255;

/// Keeps the insert under the 65,535 bind parameter limit
const VIOLATION_CHUNK_SIZE: usize = 1000;

pub struct PgRunLedger {
    pool: PgPool,
}

impl PgRunLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[async_trait]
impl RunLedger for PgRunLedger {
    async fn start_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (run_id, started_at, status, mode)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.run_id)
        .bind(record.started_at)
        .bind(record.status.as_str())
        .bind(record.mode.as_str())
        .execute(&self.pool)
        .await?;

        debug!(run_id = %record.run_id, "Run record created");
        Ok(())
    }

    async fn record_table(&self, stat: &TableStat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO table_stats (
                run_id, table_name, outcome, rows_extracted, rows_inserted,
                rows_updated, rows_deleted, rows_unchanged, validation_errors,
                duration_ms, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(stat.run_id)
        .bind(&stat.table_name)
        .bind(stat.outcome.as_str())
        .bind(stat.rows_extracted)
        .bind(stat.rows_inserted)
        .bind(stat.rows_updated)
        .bind(stat.rows_deleted)
        .bind(stat.rows_unchanged)
        .bind(stat.validation_errors)
        .bind(stat.duration_ms)
        .bind(&stat.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn log_violations(&self, run_id: Uuid, table: &str, violations: &[Violation]) -> Result<()> {
        if violations.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in violations.chunks(VIOLATION_CHUNK_SIZE) {
            let mut query_builder = QueryBuilder::new(
                r#"
                INSERT INTO validation_logs (
                    run_id, table_name, row_index, column_name,
                    invalid_value, error_type, message
                )
                "#,
            );

            query_builder.push_values(chunk.iter(), |mut b, violation| {
                b.push_bind(run_id)
                    .push_bind(table)
                    .push_bind(violation.row_index)
                    .push_bind(&violation.column)
                    .push_bind(truncate_chars(&violation.value, MAX_LOGGED_VALUE_CHARS))
                    .push_bind(violation.kind.as_str())
                    .push_bind(&violation.message);
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(run_id = %run_id, table, count = violations.len(), "Validation violations logged");
        Ok(())
    }

    async fn dump_raw(&self, run_id: Uuid, spreadsheet_id: &str, table: &ExtractedTable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO raw.sheets_dump (run_id, spreadsheet_id, sheet_name, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run_id)
        .bind(spreadsheet_id)
        .bind(&table.table)
        .bind(table.to_records())
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run_id, table = %table.table, rows = table.rows.len(), "Raw extraction dumped");
        Ok(())
    }

    async fn finish_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
            SET finished_at = $2,
                status = $3,
                tables_processed = $4,
                total_rows_synced = $5,
                validation_errors = $6,
                duration_seconds = $7,
                error_message = $8
            WHERE run_id = $1
            "#,
        )
        .bind(record.run_id)
        .bind(record.finished_at)
        .bind(record.status.as_str())
        .bind(record.tables_processed)
        .bind(record.total_rows_synced)
        .bind(record.validation_errors)
        .bind(record.duration_seconds)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %record.run_id, status = %record.status, "Run record finalized");
        Ok(())
    }
}
