//! Source extraction
//!
//! Pulls one configured table out of a spreadsheet: resolves the tab,
//! fetches the values (retrying throttled calls), finds the header row,
//! names the columns and aligns every data row to them.

pub mod headers;
pub mod retry;
pub mod sheets;

pub use retry::{retry, Backoff, RetryPolicy};
pub use sheets::{GoogleSheetsClient, SheetSource};

use crate::error::{Result, SourceError};
use crate::sources::{RangeSpec, TableConfig};
use serde_json::{Map, Value};
use sheetsync_common::naming::{normalize_headers_with, positional_columns, ColumnName};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One data row aligned to the table's columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based position within the fetched range
    pub row_index: i32,
    /// Exactly one entry per column; blank cells are `None`
    pub values: Vec<Option<String>>,
}

impl SourceRow {
    pub fn get(&self, column: usize) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

/// Result of extracting one table
#[derive(Debug, Clone, Default)]
pub struct ExtractedTable {
    pub table: String,
    pub columns: Vec<ColumnName>,
    pub rows: Vec<SourceRow>,
}

impl ExtractedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.as_str() == name)
    }

    /// Rows as JSON objects keyed by column name; blank cells are `null`
    pub fn to_records(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let record: Map<String, Value> = self
                        .columns
                        .iter()
                        .zip(&row.values)
                        .map(|(column, value)| {
                            let cell = value.as_ref().map_or(Value::Null, |v| Value::String(v.clone()));
                            (column.as_str().to_string(), cell)
                        })
                        .collect();
                    Value::Object(record)
                })
                .collect(),
        )
    }
}

/// A1 notation for `range` on tab `title`. Auto mode reads the whole tab.
pub fn a1_range(title: &str, range: &RangeSpec) -> String {
    let quoted = format!("'{}'", title.replace('\'', "''"));
    match range {
        RangeSpec::Auto => quoted,
        RangeSpec::Range(r) => format!("{}!{}", quoted, r),
    }
}

pub struct Extractor {
    source: Arc<dyn SheetSource>,
    policy: RetryPolicy,
}

impl Extractor {
    pub fn new(source: Arc<dyn SheetSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn source(&self) -> Arc<dyn SheetSource> {
        Arc::clone(&self.source)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Extract one table. Performs no writes.
    #[instrument(skip_all, fields(table = %config.target_table))]
    pub async fn extract(&self, spreadsheet_id: &str, config: &TableConfig) -> Result<ExtractedTable> {
        let sheet = config.sheet_ref()?;
        info!("Extracting {} from {} ({:?})", config.target_table, spreadsheet_id, sheet);

        let title = retry(&self.policy, SourceError::is_retryable, |_| {
            self.source.resolve_title(spreadsheet_id, &sheet)
        })
        .await?;

        let range = a1_range(&title, &config.range);
        let values = retry(&self.policy, SourceError::is_retryable, |_| {
            self.source.fetch_values(spreadsheet_id, &range)
        })
        .await?;

        if values.is_empty() {
            warn!("No data found for {}", config.target_table);
            return Ok(ExtractedTable {
                table: config.target_table.clone(),
                ..Default::default()
            });
        }

        let header_idx = match config.range {
            RangeSpec::Auto => headers::locate_header(&values, &config.header_markers)?,
            RangeSpec::Range(_) => 0,
        };
        let header = &values[header_idx];

        let columns = if config.positional {
            positional_columns(header.len())
        } else {
            normalize_headers_with(header, &config.column_mapping)?
        };

        let rows = headers::align_rows(values, header_idx, columns.len());

        info!(
            columns = columns.len(),
            rows = rows.len(),
            header_row = header_idx + 1,
            "Extracted {}",
            config.target_table
        );

        Ok(ExtractedTable {
            table: config.target_table.clone(),
            columns,
            rows,
        })
    }
}
