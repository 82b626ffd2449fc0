//! Transactional loader
//!
//! Two ways into a table: [`TargetStore::full_reload`] replaces its contents,
//! [`TargetStore::apply_change_set`] applies a reconciled delta. Both run in
//! a single transaction; a failure leaves the table as it was.

pub mod identifier;
pub mod postgres;
pub mod sql;

pub use identifier::{quote_column, quote_table, validate_column, validate_identifier};
pub use postgres::PgTargetStore;

use crate::error::Result;
use crate::sources::KeyColumn;
use crate::sync::{ChangeSet, PreparedRow};
use async_trait::async_trait;
use serde::Serialize;
use sheetsync_common::naming::ColumnName;
use std::collections::HashMap;

/// Rows written by one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Warehouse side of a sync
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Key to fingerprint of every loaded row. A table that does not exist
    /// yet has an empty state.
    async fn prior_state(&self, table: &str, key: &KeyColumn) -> Result<HashMap<String, String>>;

    /// Truncate, then insert `rows`. All or nothing.
    async fn full_reload(&self, table: &str, columns: &[ColumnName], rows: &[PreparedRow]) -> Result<LoadStats>;

    /// Inserts, updates and deletes keyed on `key`, in one transaction
    async fn apply_change_set(
        &self,
        table: &str,
        columns: &[ColumnName],
        changes: &ChangeSet,
        key: &KeyColumn,
    ) -> Result<LoadStats>;

    /// Drop and recreate the staging table from `columns`. Destroys data.
    async fn recreate_table(&self, table: &str, columns: &[ColumnName]) -> Result<()>;
}
