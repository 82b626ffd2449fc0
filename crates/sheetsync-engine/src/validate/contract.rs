//! Per-entity JSON contracts
//!
//! ```json
//! {
//!   "entity": "Clients",
//!   "columns": [
//!     {"name": "id", "type": "integer", "required": true},
//!     {"name": "Дата", "type": "date", "format": ["DD.MM.YYYY", "DD.MM"]},
//!     {"name": "amount", "type": "money", "required": true, "default": 0}
//!   ]
//! }
//! ```

use crate::error::{Result, SyncError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Date shapes a contract can name
pub const DATE_FORMATS: [&str; 5] = ["DD.MM.YYYY", "DD.MM.YY", "DD.MM.", "DD.MM", "YYYY-MM-DD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    #[serde(alias = "currency")]
    Money,
    Date,
    Time,
}

/// Accepted format(s) of a date column
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FormatSpec {
    One(String),
    Many(Vec<String>),
}

impl FormatSpec {
    pub fn names(&self) -> Vec<&str> {
        match self {
            FormatSpec::One(f) => vec![f.as_str()],
            FormatSpec::Many(fs) => fs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    /// A required column with a default may be empty in the sheet
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub format: Option<FormatSpec>,
}

fn default_type() -> ColumnType {
    ColumnType::String
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl Contract {
    pub fn parse(raw: &str) -> Result<Self> {
        let contract: Contract =
            serde_json::from_str(raw).map_err(|e| SyncError::contract(format!("invalid contract: {}", e)))?;
        contract.check_formats()?;
        Ok(contract)
    }

    fn check_formats(&self) -> Result<()> {
        for column in &self.columns {
            let Some(format) = &column.format else {
                continue;
            };
            if column.column_type != ColumnType::Date {
                continue;
            }
            if let Some(unknown) = format.names().into_iter().find(|f| !DATE_FORMATS.contains(f)) {
                return Err(SyncError::contract(format!(
                    "column '{}': unknown date format '{}' (known: {})",
                    column.name,
                    unknown,
                    DATE_FORMATS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Loads `<dir>/<entity lowercased>.json` once per entity
pub struct ContractStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Contract>>>,
}

impl ContractStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, entity: &str) -> PathBuf {
        self.dir.join(format!("{}.json", entity.to_lowercase()))
    }

    pub fn load(&self, entity: &str) -> Result<Arc<Contract>> {
        if let Some(cached) = self.cached(entity) {
            return Ok(cached);
        }

        let path = self.path_for(entity);
        let raw = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                SyncError::contract(format!(
                    "contract not found: {} (add it, or set skip_validation: true on the table)",
                    path.display()
                ))
            },
            _ => SyncError::contract(format!("cannot read {}: {}", path.display(), e)),
        })?;

        let contract = Arc::new(
            Contract::parse(&raw).map_err(|e| match e {
                SyncError::Contract(msg) => SyncError::contract(format!("{}: {}", path.display(), msg)),
                other => other,
            })?,
        );
        debug!(entity, columns = contract.columns.len(), "Contract loaded");

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(entity.to_string(), Arc::clone(&contract));
        }
        Ok(contract)
    }

    fn cached(&self, entity: &str) -> Option<Arc<Contract>> {
        self.cache.lock().ok()?.get(entity).cloned()
    }
}
