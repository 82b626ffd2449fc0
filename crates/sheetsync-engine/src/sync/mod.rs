//! Change reconciliation (CDC)

pub mod cdc;
pub mod types;

pub use crate::sources::KeyColumn;
pub use cdc::{reconcile, Reconciler};
pub use types::{ChangeSet, ChangeStats, PreparedRow, RowChange};

use crate::error::{Result, SyncError};
use crate::extract::ExtractedTable;
use sheetsync_common::fingerprint::fingerprint_excluding;
use sheetsync_common::naming::slugify;

/// Characters stripped from both ends of a key cell.
///
/// Exactly the Unicode `White_Space` set. The loader hands the same string
/// to `btrim(key, chars)`, so keys read back from the warehouse compare equal
/// to keys built from the sheet.
pub const KEY_TRIM_CHARS: &str = "\t\n\u{b}\u{c}\r \u{85}\u{a0}\u{1680}\
    \u{2000}\u{2001}\u{2002}\u{2003}\u{2004}\u{2005}\u{2006}\u{2007}\u{2008}\u{2009}\u{200a}\
    \u{2028}\u{2029}\u{202f}\u{205f}\u{3000}";

/// Trimmed key, `None` when nothing is left
pub fn normalize_key(raw: &str) -> Option<&str> {
    let key = raw.trim_matches(|c: char| KEY_TRIM_CHARS.contains(c));
    (!key.is_empty()).then_some(key)
}

/// Fingerprint every row and attach its reconciliation key.
///
/// `exclude` names columns (as configured, or their slug) left out of the
/// fingerprint. A configured key column missing from the headers is a
/// configuration error for the table.
pub fn prepare_rows(table: &ExtractedTable, key: &KeyColumn, exclude: &[String]) -> Result<Vec<PreparedRow>> {
    let key_idx = match key {
        KeyColumn::Column(name) => Some(table.column_index(name.as_str()).ok_or_else(|| {
            SyncError::config(format!(
                "{}: key column '{}' not found in sheet headers",
                table.table, name
            ))
        })?),
        KeyColumn::Fingerprint => None,
    };

    let mut excluded = Vec::with_capacity(exclude.len());
    for name in exclude {
        let idx = table
            .column_index(name)
            .or_else(|| table.column_index(&slugify(name)))
            .ok_or_else(|| {
                SyncError::config(format!(
                    "{}: fingerprint_exclude column '{}' not found in sheet headers",
                    table.table, name
                ))
            })?;
        excluded.push(idx);
    }

    Ok(table
        .rows
        .iter()
        .map(|row| {
            let fingerprint = fingerprint_excluding(&row.values, &excluded);
            let key = match key_idx {
                Some(idx) => row.get(idx).and_then(normalize_key).map(String::from),
                None => Some(fingerprint.as_str().to_string()),
            };
            PreparedRow {
                key,
                fingerprint,
                row: row.clone(),
            }
        })
        .collect())
}
