use crate::extract::SourceRow;
use serde::Serialize;
use sheetsync_common::Fingerprint;

/// Extracted row with its reconciliation identity
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    /// `None` when the key column is blank
    pub key: Option<String>,
    pub fingerprint: Fingerprint,
    pub row: SourceRow,
}

/// A row to insert or update
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub row: SourceRow,
}

/// Writes needed to bring a table in line with one extraction
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub inserts: Vec<RowChange>,
    pub updates: Vec<RowChange>,
    /// Keys present before and absent now, sorted
    pub deletes: Vec<String>,
    pub unchanged: usize,
    /// Rows left out because their key was blank
    pub skipped_without_key: usize,
    /// Repeats of a key already seen in this extraction
    pub duplicates: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn stats(&self) -> ChangeStats {
        ChangeStats {
            inserts: self.inserts.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
            unchanged: self.unchanged,
            skipped_without_key: self.skipped_without_key,
            duplicates: self.duplicates,
        }
    }
}

/// Counters of a [`ChangeSet`], what a dry run reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeStats {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
    pub skipped_without_key: usize,
    pub duplicates: usize,
}
