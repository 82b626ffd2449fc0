//! PostgreSQL [`TargetStore`]
//!
//! Every operation opens one transaction and sets `statement_timeout`
//! locally inside it. A statement that times out aborts the transaction;
//! it is rolled back and reported, never replayed.

use super::{sql, LoadStats, TargetStore};
use crate::error::Result;
use crate::extract::SourceRow;
use crate::sources::KeyColumn;
use crate::sync::{ChangeSet, PreparedRow, KEY_TRIM_CHARS};
use async_trait::async_trait;
use sheetsync_common::naming::ColumnName;
use sheetsync_common::Fingerprint;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Rows per multi-row INSERT, before the parameter limit is considered
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// PostgreSQL bind parameter ceiling per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// `undefined_table`
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";

pub struct PgTargetStore {
    pool: PgPool,
    statement_timeout: Option<Duration>,
    batch_size: usize,
}

impl PgTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = self.statement_timeout {
            // SET does not take bind parameters; the value is a plain integer
            sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }
        Ok(tx)
    }

    fn chunk_size(&self, width: usize) -> usize {
        let params_per_row = width + 2;
        self.batch_size.min(MAX_BIND_PARAMS / params_per_row).max(1)
    }

    /// Multi-row inserts of `(row, fingerprint)` pairs
    async fn insert_rows(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        table: &str,
        columns: &[ColumnName],
        rows: &[(&SourceRow, &Fingerprint)],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let prefix = sql::insert_prefix(table, columns)?;
        let chunk_size = self.chunk_size(columns.len());
        let mut inserted = 0usize;

        for chunk in rows.chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
            query_builder.push_values(chunk.iter(), |mut b, (row, fingerprint)| {
                for value in &row.values {
                    b.push_bind(value.as_deref());
                }
                b.push_bind(row.row_index).push_bind(fingerprint.as_str());
            });

            let result = query_builder.build().execute(&mut **tx).await?;
            inserted += result.rows_affected() as usize;
        }

        debug!(table, inserted, "Inserted rows");
        Ok(inserted)
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    #[instrument(skip(self), fields(table = %table))]
    async fn prior_state(&self, table: &str, key: &KeyColumn) -> Result<HashMap<String, String>> {
        let query = sql::select_prior_state(table, key)?;
        let mut tx = self.begin().await?;

        let rows = match sqlx::query_as::<_, (String, String)>(&query)
            .bind(KEY_TRIM_CHARS)
            .fetch_all(&mut *tx)
            .await
        {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(SQLSTATE_UNDEFINED_TABLE) => {
                warn!("Table {} does not exist yet, treating prior state as empty", table);
                return Ok(HashMap::new());
            },
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        debug!(rows = rows.len(), "Fetched prior state");
        Ok(rows.into_iter().collect())
    }

    #[instrument(skip(self, columns, rows), fields(table = %table, rows = rows.len()))]
    async fn full_reload(&self, table: &str, columns: &[ColumnName], rows: &[PreparedRow]) -> Result<LoadStats> {
        let truncate = sql::truncate(table)?;
        let mut tx = self.begin().await?;

        sqlx::query(&truncate).execute(&mut *tx).await?;

        let pairs: Vec<(&SourceRow, &Fingerprint)> = rows.iter().map(|r| (&r.row, &r.fingerprint)).collect();
        let inserted = self.insert_rows(&mut tx, table, columns, &pairs).await?;

        tx.commit().await?;
        info!("Full reload of {} finished: {} rows", table, inserted);

        Ok(LoadStats {
            inserted,
            ..Default::default()
        })
    }

    #[instrument(skip(self, columns, changes), fields(table = %table))]
    async fn apply_change_set(
        &self,
        table: &str,
        columns: &[ColumnName],
        changes: &ChangeSet,
        key: &KeyColumn,
    ) -> Result<LoadStats> {
        if changes.is_empty() {
            debug!("Nothing to apply");
            return Ok(LoadStats::default());
        }

        // Build every statement before touching the table
        let update = sql::update_row(table, columns, key)?;
        let delete = sql::delete_keys(table, key)?;
        let key_idx = columns.iter().position(|c| c.as_str() == key.as_str());

        let mut tx = self.begin().await?;

        // Deletes first: a removed key never shadows a row inserted below
        let mut deleted = 0usize;
        if !changes.deletes.is_empty() {
            let result = sqlx::query(&delete)
                .bind(changes.deletes.as_slice())
                .bind(KEY_TRIM_CHARS)
                .execute(&mut *tx)
                .await?;
            deleted = result.rows_affected() as usize;
        }

        let mut updated = 0usize;
        for change in &changes.updates {
            let mut query = sqlx::query(&update);
            for (idx, value) in change.row.values.iter().enumerate() {
                if Some(idx) != key_idx {
                    query = query.bind(value.as_deref());
                }
            }
            let result = query
                .bind(change.row.row_index)
                .bind(change.fingerprint.as_str())
                .bind(change.key.as_str())
                .bind(KEY_TRIM_CHARS)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected() as usize;
        }

        let pairs: Vec<(&SourceRow, &Fingerprint)> = changes
            .inserts
            .iter()
            .map(|c| (&c.row, &c.fingerprint))
            .collect();
        let inserted = self.insert_rows(&mut tx, table, columns, &pairs).await?;

        tx.commit().await?;

        let stats = LoadStats {
            inserted,
            updated,
            deleted,
        };
        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "Applied change set to {}",
            table
        );
        Ok(stats)
    }

    #[instrument(skip(self, columns), fields(table = %table, columns = columns.len()))]
    async fn recreate_table(&self, table: &str, columns: &[ColumnName]) -> Result<()> {
        let statements = sql::create_staging_table(table, columns)?;
        let mut tx = self.begin().await?;
        for statement in &statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        warn!("Staging table {} recreated, previous contents dropped", table);
        Ok(())
    }
}
