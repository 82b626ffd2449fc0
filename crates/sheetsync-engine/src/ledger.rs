//! Run bookkeeping: one [`RunRecord`] per run, one [`TableStat`] per table,
//! plus the validation audit trail and the raw extraction dumps.
//!
//! A record is created with status `running` before the first table and
//! finalized exactly once. A process killed in between leaves a `running`
//! record behind; readers must treat such records as stale; they are never
//! repaired here.

use crate::error::Result;
use crate::extract::ExtractedTable;
use crate::validate::Violation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sheetsync_common::types::{RunMode, RunStatus, TableOutcome};
use uuid::Uuid;

/// One orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub mode: RunMode,
    pub tables_processed: i32,
    pub total_rows_synced: i64,
    pub validation_errors: i32,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn start(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            mode,
            tables_processed: 0,
            total_rows_synced: 0,
            validation_errors: 0,
            duration_seconds: None,
            error_message: None,
        }
    }

    /// Fold one table's counters into the run aggregates
    pub fn absorb(&mut self, stat: &TableStat) {
        self.tables_processed += 1;
        self.total_rows_synced += stat.rows_synced();
        self.validation_errors += stat.validation_errors;
    }

    /// Close the record. Called once per run.
    pub fn finish(&mut self, status: RunStatus, error_message: Option<String>) {
        let finished_at = Utc::now();
        let elapsed = finished_at - self.started_at;
        self.duration_seconds = Some(elapsed.num_milliseconds() as f64 / 1000.0);
        self.finished_at = Some(finished_at);
        self.status = status;
        self.error_message = error_message;
    }
}

/// Counters of one table within one run
#[derive(Debug, Clone, Serialize)]
pub struct TableStat {
    pub run_id: Uuid,
    pub table_name: String,
    pub outcome: TableOutcome,
    pub rows_extracted: i32,
    pub rows_inserted: i32,
    pub rows_updated: i32,
    pub rows_deleted: i32,
    pub rows_unchanged: i32,
    pub validation_errors: i32,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl TableStat {
    pub fn new(run_id: Uuid, table_name: impl Into<String>) -> Self {
        Self {
            run_id,
            table_name: table_name.into(),
            outcome: TableOutcome::Synced,
            rows_extracted: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_deleted: 0,
            rows_unchanged: 0,
            validation_errors: 0,
            duration_ms: 0,
            error_message: None,
        }
    }

    pub fn rows_synced(&self) -> i64 {
        i64::from(self.rows_inserted) + i64::from(self.rows_updated) + i64::from(self.rows_deleted)
    }

    /// `+ins ~upd -del =unch !violations`
    pub fn summary_line(&self) -> String {
        format!(
            "+{} ~{} -{} ={} !{}",
            self.rows_inserted,
            self.rows_updated,
            self.rows_deleted,
            self.rows_unchanged,
            self.validation_errors
        )
    }
}

/// Persistence seam for run bookkeeping
#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn start_run(&self, record: &RunRecord) -> Result<()>;

    async fn record_table(&self, stat: &TableStat) -> Result<()>;

    async fn log_violations(&self, run_id: Uuid, table: &str, violations: &[Violation]) -> Result<()>;

    /// Keep the extraction as fetched, before validation touches it
    async fn dump_raw(&self, run_id: Uuid, spreadsheet_id: &str, table: &ExtractedTable) -> Result<()>;

    async fn finish_run(&self, record: &RunRecord) -> Result<()>;
}
