//! Warehouse view export
//!
//! Reads a view and writes it back to a sheet tab: header row first, then
//! one row per record. The tab is cleared before writing, so the sheet
//! always mirrors the view.

use crate::error::{Result, SourceError};
use crate::extract::{a1_range, retry, RetryPolicy, SheetSource};
use crate::load::{sql, validate_identifier};
use crate::sources::{ExportConfig, RangeSpec};
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How timestamps are rendered in exported sheets
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

/// Outcome of one export
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub view: String,
    pub rows: usize,
    pub error: Option<String>,
}

/// Render one JSON value as a sheet cell
pub fn format_cell(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(s) => Value::String(format_timestamp(s).unwrap_or_else(|| s.clone())),
        Value::Number(_) | Value::Bool(_) => value.clone(),
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
    }
}

/// `to_jsonb` renders `timestamptz` as RFC 3339 and `timestamp` without an
/// offset. Plain dates are left alone.
fn format_timestamp(raw: &str) -> Option<String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.format(EXPORT_TIMESTAMP_FORMAT).to_string());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.format(EXPORT_TIMESTAMP_FORMAT).to_string())
}

/// Header row plus one row per record, cells in `columns` order
pub fn build_grid(columns: &[String], records: &[Value]) -> Vec<Vec<Value>> {
    let mut grid = Vec::with_capacity(records.len() + 1);
    grid.push(columns.iter().map(|c| Value::String(c.clone())).collect());

    for record in records {
        grid.push(
            columns
                .iter()
                .map(|c| format_cell(record.get(c).unwrap_or(&Value::Null)))
                .collect(),
        );
    }
    grid
}

pub struct Exporter {
    pool: PgPool,
    sheets: Arc<dyn SheetSource>,
    policy: RetryPolicy,
}

impl Exporter {
    pub fn new(pool: PgPool, sheets: Arc<dyn SheetSource>, policy: RetryPolicy) -> Self {
        Self { pool, sheets, policy }
    }

    /// Export every entry. Failures are reported per view, never raised.
    pub async fn export_all(&self, exports: &[ExportConfig]) -> Vec<ExportReport> {
        let mut reports = Vec::with_capacity(exports.len());
        for export in exports {
            let report = match self.export(export).await {
                Ok(rows) => ExportReport {
                    view: export.view.clone(),
                    rows,
                    error: None,
                },
                Err(e) => {
                    warn!("Export of {} failed: {}", export.view, e);
                    ExportReport {
                        view: export.view.clone(),
                        rows: 0,
                        error: Some(e.to_string()),
                    }
                },
            };
            reports.push(report);
        }
        reports
    }

    /// Export one view. Returns the number of data rows written.
    #[instrument(skip_all, fields(view = %export.view))]
    pub async fn export(&self, export: &ExportConfig) -> Result<usize> {
        let columns = self.view_columns(&export.view).await?;
        let records: Vec<Value> = sqlx::query_scalar(&sql::select_view_rows(&export.view)?)
            .fetch_all(&self.pool)
            .await?;

        if records.is_empty() {
            warn!("View {} is empty, export skipped", export.view);
            return Ok(0);
        }

        let grid = build_grid(&columns, &records);
        let sheet = export.sheet_ref();
        let spreadsheet_id = export.spreadsheet_id.as_str();

        let title = retry(&self.policy, SourceError::is_retryable, |_| {
            self.sheets.resolve_title(spreadsheet_id, &sheet)
        })
        .await?;

        let whole_tab = a1_range(&title, &RangeSpec::Auto);
        let top_left = a1_range(&title, &RangeSpec::Range("A1".to_string()));

        retry(&self.policy, SourceError::is_retryable, |_| {
            self.sheets.clear_values(spreadsheet_id, &whole_tab)
        })
        .await?;
        retry(&self.policy, SourceError::is_retryable, |_| {
            self.sheets.update_values(spreadsheet_id, &top_left, grid.clone())
        })
        .await?;

        info!("View {} exported to '{}' ({} rows)", export.view, title, records.len());
        Ok(records.len())
    }

    /// Column names of a view in declaration order
    async fn view_columns(&self, view: &str) -> Result<Vec<String>> {
        let (schema, name) = validate_identifier(view)?;
        let columns = sqlx::query_scalar::<_, String>(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = COALESCE($1::text, current_schema())
              AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(columns)
    }
}
