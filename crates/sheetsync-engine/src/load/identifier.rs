//! SQL identifier checks
//!
//! Table and column names end up in SQL text, where they cannot be bound as
//! parameters. Column names come from spreadsheet headers, i.e. from anyone
//! with edit access to the sheet. Every statement builder runs its
//! identifiers through here, regardless of what normalized them upstream.

use crate::error::{Result, SyncError};
use sheetsync_common::naming::MAX_IDENTIFIER_LEN;

fn check_part<'a>(full: &str, part: &'a str) -> Result<&'a str> {
    let mut chars = part.chars();
    match chars.next() {
        None => return Err(SyncError::unsafe_identifier(full, "empty name part")),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(SyncError::unsafe_identifier(full, "must start with a letter"))
        },
        Some(_) => {},
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SyncError::unsafe_identifier(
            full,
            "only letters, digits and underscores are allowed",
        ));
    }
    if part.len() > MAX_IDENTIFIER_LEN {
        return Err(SyncError::unsafe_identifier(full, "longer than 63 characters"));
    }
    Ok(part)
}

/// Accept `table` or `schema.table`. Returns the parts.
pub fn validate_identifier(name: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = name.split('.');
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    if parts.next().is_some() {
        return Err(SyncError::unsafe_identifier(name, "at most one schema qualifier"));
    }

    match second {
        Some(table) => Ok((Some(check_part(name, first)?), check_part(name, table)?)),
        None => Ok((None, check_part(name, first)?)),
    }
}

/// Accept a bare column name. Metadata columns (`_row_index`, `__row_hash`,
/// `_loaded_at`) are the only names allowed to start with an underscore.
pub fn validate_column(name: &str) -> Result<&str> {
    if sheetsync_common::naming::RESERVED_COLUMNS.contains(&name) {
        return Ok(name);
    }
    if name.contains('.') {
        return Err(SyncError::unsafe_identifier(name, "column names cannot be qualified"));
    }
    check_part(name, name)
}

/// `"schema"."table"` or `"table"`
pub fn quote_table(name: &str) -> Result<String> {
    Ok(match validate_identifier(name)? {
        (Some(schema), table) => format!("\"{}\".\"{}\"", schema, table),
        (None, table) => format!("\"{}\"", table),
    })
}

/// `"column"`
pub fn quote_column(name: &str) -> Result<String> {
    Ok(format!("\"{}\"", validate_column(name)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsafe_identifiers() {
        for bad in [
            "users; DROP TABLE users",
            "table name",
            "table-name",
            "schema..table",
            "a.b.c",
            "1table",
            "_hidden",
            "",
            ".table",
            "table.",
            "tbl\"",
            "таблица",
        ] {
            let err = validate_identifier(bad).unwrap_err();
            assert!(
                matches!(err, SyncError::UnsafeIdentifier { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_safe_identifiers() {
        assert_eq!(validate_identifier("core.sales").unwrap(), (Some("core"), "sales"));
        assert_eq!(validate_identifier("my_table_123").unwrap(), (None, "my_table_123"));
        assert!(validate_identifier("Stg.Clients_Cur").is_ok());
    }

    #[test]
    fn test_length_limit() {
        let ok = "a".repeat(63);
        let long = "a".repeat(64);
        assert!(validate_identifier(&ok).is_ok());
        assert!(validate_identifier(&long).is_err());
        assert!(validate_identifier(&format!("s.{}", long)).is_err());
    }

    #[test]
    fn test_columns() {
        assert_eq!(quote_column("imya").unwrap(), "\"imya\"");
        assert_eq!(quote_column("__row_hash").unwrap(), "\"__row_hash\"");
        assert!(quote_column("stg.col").is_err());
        assert!(quote_column("col\" = 1; --").is_err());
        assert!(quote_column("_private").is_err());
    }

    #[test]
    fn test_quote_table() {
        assert_eq!(quote_table("stg.clients").unwrap(), "\"stg\".\"clients\"");
        assert_eq!(quote_table("clients").unwrap(), "\"clients\"");
        assert!(quote_table("stg.clients; --").is_err());
    }
}
