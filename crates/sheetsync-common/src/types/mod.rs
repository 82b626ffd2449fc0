//! Shared enums for sync configuration and run bookkeeping

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a configured table is written to the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Reconcile against the previous load and apply only the delta
    #[default]
    Upsert,
    /// Truncate and reload on every run
    Replace,
}

/// Status of a run record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// Load strategy of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    FullReload,
    Cdc,
}

/// Terminal state of one table within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableOutcome {
    Synced,
    /// Extraction returned no data rows; nothing was written
    Skipped,
    /// Validation crossed an abort threshold; load never ran
    Aborted,
    Failed,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CommonError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(CommonError::Parse(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(SyncMode { Upsert => "upsert", Replace => "replace" });
str_enum!(RunStatus { Running => "running", Success => "success", Failed => "failed" });
str_enum!(RunMode { FullReload => "full_reload", Cdc => "cdc" });
str_enum!(TableOutcome {
    Synced => "synced",
    Skipped => "skipped",
    Aborted => "aborted",
    Failed => "failed",
});

impl TableOutcome {
    /// Whether this outcome fails the surrounding run
    pub fn is_failure(&self) -> bool {
        matches!(self, TableOutcome::Aborted | TableOutcome::Failed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_strings() {
        assert_eq!("upsert".parse::<SyncMode>().unwrap(), SyncMode::Upsert);
        assert_eq!("REPLACE".parse::<SyncMode>().unwrap(), SyncMode::Replace);
        assert_eq!(RunMode::FullReload.to_string(), "full_reload");
        assert_eq!("success".parse::<RunStatus>().unwrap(), RunStatus::Success);
        assert!("merge".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_serde_matches_display() {
        let json = serde_json::to_string(&RunMode::FullReload).unwrap();
        assert_eq!(json, "\"full_reload\"");
        let mode: SyncMode = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(mode, SyncMode::Replace);
    }

    #[test]
    fn test_failure_outcomes() {
        assert!(TableOutcome::Failed.is_failure());
        assert!(TableOutcome::Aborted.is_failure());
        assert!(!TableOutcome::Skipped.is_failure());
        assert!(!TableOutcome::Synced.is_failure());
    }
}
