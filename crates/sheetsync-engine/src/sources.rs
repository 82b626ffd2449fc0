//! Sources file: which sheets go to which tables, and how
//!
//! ```yaml
//! spreadsheets:
//!   1AbC...:
//!     sheets:
//!       - target_table: stg.clients
//!         gid: 0
//!         range: "A1:Z"
//!         mode: upsert
//!         pk: id
//! exports:
//!   - view: mart.daily_sales
//!     spreadsheet_id: 1XyZ...
//!     gid: 123
//! ```
//!
//! A malformed sheet entry only fails its own table. A missing or unreadable
//! file fails the whole run before any table is touched.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Deserializer};
use sheetsync_common::naming::{ColumnName, ROW_HASH_COLUMN};
use sheetsync_common::types::SyncMode;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Range used when a sheet entry does not name one
pub const DEFAULT_RANGE: &str = "A:Z";

/// Parsed sources file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub spreadsheets: BTreeMap<String, SpreadsheetEntry>,
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

/// Sheets of one spreadsheet. Entries stay raw until [`SourcesFile::tables`]
/// so one broken entry does not reject the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpreadsheetEntry {
    #[serde(default)]
    pub sheets: Vec<serde_yaml::Value>,
}

/// Which tab of a spreadsheet to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetRef {
    Gid(i64),
    Title(String),
}

/// Where the header row is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    /// A1 range, header is its first row
    Range(String),
    /// Scan the top of the sheet for the row holding `header_markers`
    Auto,
}

impl<'de> Deserialize<'de> for RangeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            Ok(RangeSpec::Auto)
        } else if trimmed.is_empty() {
            Err(serde::de::Error::custom("range cannot be empty"))
        } else {
            Ok(RangeSpec::Range(trimmed.to_string()))
        }
    }
}

impl Default for RangeSpec {
    fn default() -> Self {
        RangeSpec::Range(DEFAULT_RANGE.to_string())
    }
}

/// One sheet -> table mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub target_table: String,
    #[serde(default)]
    pub gid: Option<i64>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub range: RangeSpec,
    #[serde(default)]
    pub mode: SyncMode,
    /// Reconciliation key column; the row fingerprint when absent
    #[serde(default)]
    pub pk: Option<String>,
    #[serde(default)]
    pub column_mapping: HashMap<String, String>,
    /// Header cells are data (e.g. dates); columns become `col_0..col_n`
    #[serde(default)]
    pub positional: bool,
    #[serde(default)]
    pub header_markers: Vec<String>,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub skip_validation: bool,
    /// Columns ignored when fingerprinting (edit timestamps and the like)
    #[serde(default)]
    pub fingerprint_exclude: Vec<String>,
}

/// Reconciliation key of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyColumn {
    Column(ColumnName),
    /// Content-addressed identity: the row fingerprint is the key
    Fingerprint,
}

impl KeyColumn {
    pub fn as_str(&self) -> &str {
        match self {
            KeyColumn::Column(name) => name.as_str(),
            KeyColumn::Fingerprint => ROW_HASH_COLUMN,
        }
    }
}

impl TableConfig {
    pub fn sheet_ref(&self) -> Result<SheetRef> {
        match (&self.gid, &self.sheet) {
            (Some(_), Some(_)) => Err(SyncError::config(format!(
                "{}: set either 'gid' or 'sheet', not both",
                self.target_table
            ))),
            (_, Some(title)) if title.trim().is_empty() => Err(SyncError::config(format!(
                "{}: 'sheet' cannot be empty",
                self.target_table
            ))),
            (_, Some(title)) => Ok(SheetRef::Title(title.clone())),
            (Some(gid), None) => Ok(SheetRef::Gid(*gid)),
            (None, None) => Ok(SheetRef::Gid(0)),
        }
    }

    pub fn key_column(&self) -> Result<KeyColumn> {
        match self.pk.as_deref().map(str::trim) {
            None | Some("") | Some(ROW_HASH_COLUMN) => Ok(KeyColumn::Fingerprint),
            Some(pk) => ColumnName::parse(pk).map(KeyColumn::Column).map_err(|e| {
                SyncError::config(format!("{}: invalid pk: {}", self.target_table, e))
            }),
        }
    }

    /// Contract entity: explicit, or the table name without schema and
    /// `_cur` / `_hst` suffixes
    pub fn contract_name(&self) -> String {
        if let Some(contract) = self.contract.as_deref().filter(|c| !c.trim().is_empty()) {
            return contract.trim().to_string();
        }

        let base = self
            .target_table
            .rsplit('.')
            .next()
            .unwrap_or(&self.target_table);
        let base = base.strip_suffix("_cur").unwrap_or(base);
        let base = base.strip_suffix("_hst").unwrap_or(base);
        base.to_string()
    }

    /// Checks that do not need the sheet contents
    pub fn validate(&self) -> Result<()> {
        if self.target_table.trim().is_empty() {
            return Err(SyncError::config("target_table cannot be empty"));
        }
        // Quoted mixed-case names would create case-sensitive objects
        if self.target_table.chars().any(|c| c.is_uppercase()) {
            return Err(SyncError::config(format!(
                "target_table '{}' must be lowercase, use '{}'",
                self.target_table,
                self.target_table.to_lowercase()
            )));
        }
        self.sheet_ref()?;
        self.key_column()?;

        if self.range == RangeSpec::Auto && self.header_markers.is_empty() {
            return Err(SyncError::config(format!(
                "{}: range 'auto' needs header_markers",
                self.target_table
            )));
        }

        if self.positional && !self.column_mapping.is_empty() {
            return Err(SyncError::config(format!(
                "{}: column_mapping has no effect on a positional table",
                self.target_table
            )));
        }

        Ok(())
    }
}

/// A table entry resolved against its spreadsheet
#[derive(Debug, Clone)]
pub struct TableJob {
    pub spreadsheet_id: String,
    /// Best-effort name for logs, available even when the entry is broken
    pub label: String,
    pub config: std::result::Result<TableConfig, String>,
}

impl TableJob {
    pub fn target_table(&self) -> &str {
        match &self.config {
            Ok(config) => &config.target_table,
            Err(_) => &self.label,
        }
    }
}

/// Export of a warehouse view back to a sheet
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    pub view: String,
    pub spreadsheet_id: String,
    #[serde(default)]
    pub gid: Option<i64>,
    #[serde(default)]
    pub sheet: Option<String>,
}

impl ExportConfig {
    pub fn sheet_ref(&self) -> SheetRef {
        match &self.sheet {
            Some(title) => SheetRef::Title(title.clone()),
            None => SheetRef::Gid(self.gid.unwrap_or(0)),
        }
    }
}

impl SourcesFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("cannot read sources file {}: {}", path.display(), e))
        })?;
        Self::parse(&raw).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| SyncError::config(e.to_string()))
    }

    /// All configured tables in file order, narrowed to `scope` when it is
    /// not empty. Scope entries match the full target name or its base name.
    pub fn tables(&self, scope: &[String]) -> Vec<TableJob> {
        let mut jobs = Vec::new();

        for (spreadsheet_id, entry) in &self.spreadsheets {
            for (idx, raw) in entry.sheets.iter().enumerate() {
                let label = raw
                    .get("target_table")
                    .and_then(serde_yaml::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}#{}", spreadsheet_id, idx));

                if !in_scope(&label, scope) {
                    continue;
                }

                let config = serde_yaml::from_value::<TableConfig>(raw.clone())
                    .map_err(|e| format!("invalid sheet entry: {}", e));

                jobs.push(TableJob {
                    spreadsheet_id: spreadsheet_id.clone(),
                    label,
                    config,
                });
            }
        }

        jobs
    }
}

fn in_scope(table: &str, scope: &[String]) -> bool {
    if scope.is_empty() {
        return true;
    }
    let base = table.rsplit('.').next().unwrap_or(table);
    scope.iter().any(|s| s == table || s == base)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
spreadsheets:
  sheet-a:
    sheets:
      - target_table: stg.clients_cur
        gid: 12
        range: "A2:K"
        pk: id
        column_mapping: {"Телефон": phone}
      - target_table: stg.rates
        sheet: Курсы
        mode: replace
        positional: true
      - target_table: stg.broken
        gid: 1
        colour: blue
  sheet-b:
    sheets:
      - target_table: stg.schedule_hst
        range: auto
        header_markers: [date, client]
        fingerprint_exclude: [updated_at]
exports:
  - view: mart.daily_sales
    spreadsheet_id: sheet-c
    gid: 7
"#;

    #[test]
    fn test_parse_and_resolve_tables() {
        let sources = SourcesFile::parse(SAMPLE).unwrap();
        let jobs = sources.tables(&[]);
        assert_eq!(jobs.len(), 4);

        let clients = jobs[0].config.as_ref().unwrap();
        assert_eq!(jobs[0].spreadsheet_id, "sheet-a");
        assert_eq!(clients.sheet_ref().unwrap(), SheetRef::Gid(12));
        assert_eq!(clients.range, RangeSpec::Range("A2:K".into()));
        assert_eq!(clients.mode, SyncMode::Upsert);
        assert_eq!(clients.key_column().unwrap().as_str(), "id");
        assert_eq!(clients.contract_name(), "clients");

        let rates = jobs[1].config.as_ref().unwrap();
        assert_eq!(rates.sheet_ref().unwrap(), SheetRef::Title("Курсы".into()));
        assert_eq!(rates.mode, SyncMode::Replace);
        assert_eq!(rates.key_column().unwrap(), KeyColumn::Fingerprint);
        assert_eq!(rates.range, RangeSpec::Range(DEFAULT_RANGE.into()));

        let schedule = jobs[3].config.as_ref().unwrap();
        assert_eq!(schedule.range, RangeSpec::Auto);
        assert_eq!(schedule.contract_name(), "schedule");
        assert!(schedule.validate().is_ok());

        assert_eq!(sources.exports.len(), 1);
        assert_eq!(sources.exports[0].sheet_ref(), SheetRef::Gid(7));
    }

    #[test]
    fn test_broken_entry_only_fails_itself() {
        let sources = SourcesFile::parse(SAMPLE).unwrap();
        let jobs = sources.tables(&[]);
        let broken = &jobs[2];
        assert_eq!(broken.target_table(), "stg.broken");
        assert!(broken.config.as_ref().unwrap_err().contains("colour"));
    }

    #[test]
    fn test_scope_matches_full_or_base_name() {
        let sources = SourcesFile::parse(SAMPLE).unwrap();
        let scoped = sources.tables(&["rates".to_string(), "stg.schedule_hst".to_string()]);
        let names: Vec<_> = scoped.iter().map(TableJob::target_table).collect();
        assert_eq!(names, vec!["stg.rates", "stg.schedule_hst"]);
    }

    #[test]
    fn test_validate_table_config() {
        let mut config: TableConfig =
            serde_yaml::from_str("target_table: stg.x\nrange: auto").unwrap();
        assert!(config.validate().is_err());

        config.header_markers = vec!["id".into()];
        assert!(config.validate().is_ok());

        config.gid = Some(1);
        config.sheet = Some("Tab".into());
        assert!(config.validate().is_err());

        config.sheet = None;
        config.pk = Some("Bad Key".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mixed_case_target_table_is_rejected() {
        let config: TableConfig = serde_yaml::from_str("target_table: Stg.Clients_Cur\ngid: 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("'stg.clients_cur'"));
    }

    #[test]
    fn test_explicit_contract_and_hash_pk() {
        let config: TableConfig = serde_yaml::from_str(
            "target_table: trainings\ncontract: schedule\npk: __row_hash",
        )
        .unwrap();
        assert_eq!(config.contract_name(), "schedule");
        assert_eq!(config.key_column().unwrap(), KeyColumn::Fingerprint);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SourcesFile::load("/nonexistent/sources.yml").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
