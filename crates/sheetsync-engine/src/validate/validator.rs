//! Row screening against a [`Contract`]
//!
//! Checks are shape matches, not conversions: a date column only has to
//! look like one of its formats.

use super::contract::{ColumnType, Contract, DATE_FORMATS};
use crate::error::{Result, SyncError};
use crate::extract::ExtractedTable;
use regex::Regex;
use serde::Serialize;
use sheetsync_common::naming::slugify;
use std::collections::HashMap;

/// More violations than this in one table aborts its load
pub const MAX_TABLE_VIOLATIONS: usize = 20;

/// More violations than this in a single row aborts the load; usually means
/// the columns shifted
pub const MAX_ROW_VIOLATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    MissingRequired,
    InvalidInteger,
    InvalidMoney,
    InvalidDate,
    InvalidTime,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MissingRequired => "MISSING_REQUIRED",
            ViolationKind::InvalidInteger => "INVALID_INTEGER",
            ViolationKind::InvalidMoney => "INVALID_MONEY",
            ViolationKind::InvalidDate => "INVALID_DATE",
            ViolationKind::InvalidTime => "INVALID_TIME",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub row_index: i32,
    pub column: String,
    pub value: String,
    pub kind: ViolationKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub total_rows: usize,
    pub valid_rows: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        (self.total_rows - self.valid_rows) as f64 / self.total_rows as f64
    }

    /// Why this report must stop the load, if it must
    pub fn abort_reason(&self) -> Option<String> {
        if self.violations.len() > MAX_TABLE_VIOLATIONS {
            return Some(format!(
                "{} violations exceed the table limit of {}",
                self.violations.len(),
                MAX_TABLE_VIOLATIONS
            ));
        }

        let mut per_row: HashMap<i32, usize> = HashMap::new();
        for violation in &self.violations {
            *per_row.entry(violation.row_index).or_default() += 1;
        }

        per_row
            .into_iter()
            .filter(|(_, count)| *count > MAX_ROW_VIOLATIONS)
            .min_by_key(|(row, _)| *row)
            .map(|(row, count)| {
                format!(
                    "row {} has {} violations (limit {}), columns look misaligned",
                    row, count, MAX_ROW_VIOLATIONS
                )
            })
    }
}

pub struct Validator {
    date_patterns: Vec<(&'static str, Regex)>,
    weekday_prefix: Regex,
    time: Regex,
    money_noise: Regex,
}

impl Validator {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        let date_sources = [
            r"^\d{2}\.\d{2}\.\d{4}$",
            r"^\d{2}\.\d{2}\.\d{2}$",
            r"^\d{2}\.\d{2}\.$",
            r"^\d{2}\.\d{2}$",
            r"^\d{4}-\d{2}-\d{2}$",
        ];
        let date_patterns = DATE_FORMATS
            .iter()
            .zip(date_sources)
            .map(|(name, src)| Regex::new(src).map(|re| (*name, re)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            date_patterns,
            weekday_prefix: Regex::new(r"(?i)^[а-яa-z]{2,3}\s+")?,
            time: Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?$")?,
            money_noise: Regex::new(r"[^\d,.\-]")?,
        })
    }

    /// Check every row of `table` against `contract`
    pub fn validate(&self, table: &ExtractedTable, contract: &Contract) -> ValidationReport {
        // Contract names may be raw header labels; fall back to their slug
        let positions: Vec<Option<usize>> = contract
            .columns
            .iter()
            .map(|column_def| {
                table
                    .column_index(&column_def.name)
                    .or_else(|| table.column_index(&slugify(&column_def.name)))
            })
            .collect();

        let mut report = ValidationReport {
            total_rows: table.rows.len(),
            ..Default::default()
        };

        for row in &table.rows {
            let before = report.violations.len();

            for (column_def, position) in contract.columns.iter().zip(&positions) {
                let value = position
                    .and_then(|idx| row.get(idx))
                    .map(str::trim)
                    .filter(|v| !v.is_empty());

                let Some(value) = value else {
                    if column_def.required && column_def.default.is_none() {
                        report.violations.push(Violation {
                            row_index: row.row_index,
                            column: column_def.name.clone(),
                            value: String::new(),
                            kind: ViolationKind::MissingRequired,
                            message: format!("Required field '{}' is empty", column_def.name),
                        });
                    }
                    continue;
                };

                if let Some((kind, message)) = self.check_type(value, column_def.column_type, column_def.format.as_ref())
                {
                    report.violations.push(Violation {
                        row_index: row.row_index,
                        column: column_def.name.clone(),
                        value: value.to_string(),
                        kind,
                        message,
                    });
                }
            }

            if report.violations.len() == before {
                report.valid_rows += 1;
            }
        }

        report
    }

    /// Abort error when the report crosses a threshold
    pub fn check_thresholds(&self, table: &str, report: &ValidationReport) -> Result<()> {
        match report.abort_reason() {
            Some(reason) => Err(SyncError::ValidationAbort {
                table: table.to_string(),
                violations: report.violations.len(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn check_type(
        &self,
        value: &str,
        column_type: ColumnType,
        format: Option<&super::contract::FormatSpec>,
    ) -> Option<(ViolationKind, String)> {
        match column_type {
            ColumnType::String => None,
            ColumnType::Integer => value.parse::<i64>().err().map(|_| {
                (
                    ViolationKind::InvalidInteger,
                    format!("Value '{}' is not an integer", value),
                )
            }),
            ColumnType::Money => {
                let cleaned = self.money_noise.replace_all(value, "");
                if cleaned.is_empty() || cleaned.replace(',', ".").parse::<f64>().is_ok() {
                    None
                } else {
                    Some((
                        ViolationKind::InvalidMoney,
                        format!("Value '{}' is not a money amount", value),
                    ))
                }
            },
            ColumnType::Date => {
                let names = format.map(|f| f.names()).unwrap_or_else(|| DATE_FORMATS.to_vec());
                if self.matches_date(value, &names) {
                    None
                } else {
                    Some((
                        ViolationKind::InvalidDate,
                        format!("Date '{}' does not match {}", value, names.join(" | ")),
                    ))
                }
            },
            ColumnType::Time => {
                if self.time.is_match(value) {
                    None
                } else {
                    Some((
                        ViolationKind::InvalidTime,
                        format!("Time '{}' does not match HH:MM", value),
                    ))
                }
            },
        }
    }

    fn matches_date(&self, value: &str, formats: &[&str]) -> bool {
        // "пн 01.02" style cells carry a weekday prefix
        let cleaned = self.weekday_prefix.replace(value, "");
        let cleaned = cleaned.trim();

        self.date_patterns
            .iter()
            .filter(|(name, _)| formats.contains(name))
            .any(|(_, re)| re.is_match(cleaned))
    }
}
