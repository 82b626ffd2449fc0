//! Statement text builders
//!
//! Pure functions: each validates every identifier it interpolates and
//! leaves all values to bind parameters.

use super::identifier::{quote_column, quote_table};
use crate::error::Result;
use crate::sources::KeyColumn;
use sheetsync_common::naming::{ColumnName, LOADED_AT_COLUMN, ROW_HASH_COLUMN, ROW_INDEX_COLUMN};

fn column_list(columns: &[ColumnName]) -> Result<Vec<String>> {
    columns.iter().map(|c| quote_column(c.as_str())).collect()
}

pub fn truncate(table: &str) -> Result<String> {
    Ok(format!("TRUNCATE TABLE {}", quote_table(table)?))
}

/// `INSERT INTO t (cols..., _row_index, __row_hash) ` ready for `VALUES`
pub fn insert_prefix(table: &str, columns: &[ColumnName]) -> Result<String> {
    let mut cols = column_list(columns)?;
    cols.push(quote_column(ROW_INDEX_COLUMN)?);
    cols.push(quote_column(ROW_HASH_COLUMN)?);
    Ok(format!("INSERT INTO {} ({}) ", quote_table(table)?, cols.join(", ")))
}

/// Update one row by key.
///
/// Binds, in order: every non-key column value, the row index, the
/// fingerprint, the key, the key trim characters.
pub fn update_row(table: &str, columns: &[ColumnName], key: &KeyColumn) -> Result<String> {
    let mut sets = Vec::with_capacity(columns.len() + 3);
    let mut param = 1;
    for column in columns.iter().filter(|c| c.as_str() != key.as_str()) {
        sets.push(format!("{} = ${}", quote_column(column.as_str())?, param));
        param += 1;
    }
    sets.push(format!("{} = ${}", quote_column(ROW_INDEX_COLUMN)?, param));
    sets.push(format!("{} = ${}", quote_column(ROW_HASH_COLUMN)?, param + 1));
    sets.push(format!("{} = now()", quote_column(LOADED_AT_COLUMN)?));

    Ok(format!(
        "UPDATE {} SET {} WHERE btrim({}::text, ${}) = ${}",
        quote_table(table)?,
        sets.join(", "),
        quote_column(key.as_str())?,
        param + 3,
        param + 2
    ))
}

/// Binds a `text[]` of keys, then the key trim characters
pub fn delete_keys(table: &str, key: &KeyColumn) -> Result<String> {
    Ok(format!(
        "DELETE FROM {} WHERE btrim({}::text, $2) = ANY($1)",
        quote_table(table)?,
        quote_column(key.as_str())?
    ))
}

/// `key`, `hash` pairs of the rows currently loaded.
///
/// Binds the key trim characters. Blank keys are left out, as they are on
/// the extraction side.
pub fn select_prior_state(table: &str, key: &KeyColumn) -> Result<String> {
    let key_col = quote_column(key.as_str())?;
    let hash_col = quote_column(ROW_HASH_COLUMN)?;
    Ok(format!(
        "SELECT btrim({key}::text, $1) AS key, {hash} AS hash FROM {table} \
         WHERE {key} IS NOT NULL AND {hash} IS NOT NULL AND btrim({key}::text, $1) <> ''",
        key = key_col,
        hash = hash_col,
        table = quote_table(table)?
    ))
}

/// Drop and recreate a staging table: every column `text`, plus metadata
pub fn create_staging_table(table: &str, columns: &[ColumnName]) -> Result<[String; 2]> {
    let quoted = quote_table(table)?;
    let mut defs: Vec<String> = column_list(columns)?
        .into_iter()
        .map(|c| format!("{} text", c))
        .collect();
    defs.push(format!("{} integer", quote_column(ROW_INDEX_COLUMN)?));
    defs.push(format!("{} text", quote_column(ROW_HASH_COLUMN)?));
    defs.push(format!(
        "{} timestamp with time zone DEFAULT now()",
        quote_column(LOADED_AT_COLUMN)?
    ));

    Ok([
        format!("DROP TABLE IF EXISTS {}", quoted),
        format!("CREATE TABLE {} ({})", quoted, defs.join(", ")),
    ])
}

/// Rows of a view as JSON objects, one per row
pub fn select_view_rows(view: &str) -> Result<String> {
    Ok(format!("SELECT to_jsonb(v) AS row FROM {} v", quote_table(view)?))
}
