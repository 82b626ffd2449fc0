//! Shared test utilities
//!
//! In-memory implementations of the engine seams ([`SheetSource`],
//! [`TargetStore`], [`RunLedger`]) for orchestrator scenarios, plus a
//! PostgreSQL container with migrations applied for the database tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sheetsync_common::naming::ColumnName;
use sheetsync_engine::error::SourceError;
use sheetsync_engine::extract::{ExtractedTable, Extractor, RetryPolicy, SheetSource};
use sheetsync_engine::ledger::{RunLedger, RunRecord, TableStat};
use sheetsync_engine::load::{LoadStats, TargetStore};
use sheetsync_engine::lock::ProcessLock;
use sheetsync_engine::sources::{KeyColumn, SheetRef};
use sheetsync_engine::sync::{normalize_key, ChangeSet, PreparedRow};
use sheetsync_engine::validate::{ContractStore, Validator, Violation};
use sheetsync_engine::Orchestrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sheetsync_engine=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

// ============================================================================
// Spreadsheet fake
// ============================================================================

/// Tabs addressed by gid; values are served for any range on the tab
#[derive(Default)]
pub struct FakeSheetSource {
    tabs: Mutex<HashMap<i64, (String, Vec<Vec<String>>)>>,
    failures: Mutex<Vec<SourceError>>,
    delay: Mutex<Option<Duration>>,
    pub fetches: AtomicUsize,
    pub writes: Mutex<Vec<(String, Vec<Vec<Value>>)>>,
}

impl FakeSheetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tab(&self, gid: i64, title: &str, values: Vec<Vec<String>>) {
        self.tabs
            .lock()
            .unwrap()
            .insert(gid, (title.to_string(), values));
    }

    /// Next fetch fails with `err`
    pub fn fail_next(&self, err: SourceError) {
        self.failures.lock().unwrap().push(err);
    }

    /// Every fetch sleeps this long first
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn tab_by_range(&self, range: &str) -> Option<Vec<Vec<String>>> {
        self.tabs
            .lock()
            .unwrap()
            .values()
            .find(|(title, _)| range.starts_with(&format!("'{}'", title.replace('\'', "''"))))
            .map(|(_, values)| values.clone())
    }
}

#[async_trait]
impl SheetSource for FakeSheetSource {
    async fn resolve_title(&self, spreadsheet_id: &str, sheet: &SheetRef) -> Result<String, SourceError> {
        match sheet {
            SheetRef::Title(title) => Ok(title.clone()),
            SheetRef::Gid(gid) => self
                .tabs
                .lock()
                .unwrap()
                .get(gid)
                .map(|(title, _)| title.clone())
                .ok_or_else(|| SourceError::NotFound(format!("gid {} not in {}", gid, spreadsheet_id))),
        }
    }

    async fn fetch_values(&self, _spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop() {
            return Err(err);
        }
        self.tab_by_range(range)
            .ok_or_else(|| SourceError::NotFound(format!("no tab for range {}", range)))
    }

    async fn clear_values(&self, _spreadsheet_id: &str, _range: &str) -> Result<(), SourceError> {
        Ok(())
    }

    async fn update_values(&self, _spreadsheet_id: &str, range: &str, rows: Vec<Vec<Value>>) -> Result<(), SourceError> {
        self.writes.lock().unwrap().push((range.to_string(), rows));
        Ok(())
    }
}

// ============================================================================
// Warehouse fake
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<String>,
    /// `(values, row_index, fingerprint)`
    pub rows: Vec<(Vec<Option<String>>, i32, String)>,
}

impl MemTable {
    fn key_of(&self, values: &[Option<String>], fingerprint: &str, key: &KeyColumn) -> Option<String> {
        match key {
            KeyColumn::Fingerprint => Some(fingerprint.to_string()),
            KeyColumn::Column(name) => {
                let idx = self.columns.iter().position(|c| c == name.as_str())?;
                values
                    .get(idx)
                    .and_then(|v| v.as_deref())
                    .and_then(normalize_key)
                    .map(String::from)
            },
        }
    }

    /// Value of `column` in every row, in storage order
    pub fn column(&self, column: &str) -> Vec<Option<String>> {
        let idx = self.columns.iter().position(|c| c == column).unwrap();
        self.rows.iter().map(|(values, _, _)| values[idx].clone()).collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub tables: Mutex<HashMap<String, MemTable>>,
    pub full_reloads: AtomicUsize,
    pub change_sets: AtomicUsize,
    pub recreated: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<MemTable> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    pub fn writes(&self) -> usize {
        self.full_reloads.load(Ordering::SeqCst)
            + self.change_sets.load(Ordering::SeqCst)
            + self.recreated.load(Ordering::SeqCst)
    }
}

fn names(columns: &[ColumnName]) -> Vec<String> {
    columns.iter().map(|c| c.as_str().to_string()).collect()
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn prior_state(&self, table: &str, key: &KeyColumn) -> sheetsync_engine::Result<HashMap<String, String>> {
        let tables = self.tables.lock().unwrap();
        let Some(mem) = tables.get(table) else {
            return Ok(HashMap::new());
        };
        Ok(mem
            .rows
            .iter()
            .filter_map(|(values, _, fp)| mem.key_of(values, fp, key).map(|k| (k, fp.clone())))
            .collect())
    }

    async fn full_reload(
        &self,
        table: &str,
        columns: &[ColumnName],
        rows: &[PreparedRow],
    ) -> sheetsync_engine::Result<LoadStats> {
        self.full_reloads.fetch_add(1, Ordering::SeqCst);
        let mem = MemTable {
            columns: names(columns),
            rows: rows
                .iter()
                .map(|r| (r.row.values.clone(), r.row.row_index, r.fingerprint.as_str().to_string()))
                .collect(),
        };
        let inserted = mem.rows.len();
        self.tables.lock().unwrap().insert(table.to_string(), mem);
        Ok(LoadStats {
            inserted,
            ..Default::default()
        })
    }

    async fn apply_change_set(
        &self,
        table: &str,
        columns: &[ColumnName],
        changes: &ChangeSet,
        key: &KeyColumn,
    ) -> sheetsync_engine::Result<LoadStats> {
        self.change_sets.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.lock().unwrap();
        let mem = tables.entry(table.to_string()).or_insert_with(|| MemTable {
            columns: names(columns),
            rows: Vec::new(),
        });

        let mut stats = LoadStats::default();
        for change in &changes.updates {
            for i in 0..mem.rows.len() {
                let (values, _, fp) = &mem.rows[i];
                if mem.key_of(values, fp, key).as_deref() == Some(change.key.as_str()) {
                    mem.rows[i] = (
                        change.row.values.clone(),
                        change.row.row_index,
                        change.fingerprint.as_str().to_string(),
                    );
                    stats.updated += 1;
                }
            }
        }

        let before = mem.rows.len();
        let snapshot = mem.clone();
        mem.rows.retain(|(values, _, fp)| {
            snapshot
                .key_of(values, fp, key)
                .map_or(true, |k| !changes.deletes.contains(&k))
        });
        stats.deleted = before - mem.rows.len();

        for change in &changes.inserts {
            mem.rows.push((
                change.row.values.clone(),
                change.row.row_index,
                change.fingerprint.as_str().to_string(),
            ));
            stats.inserted += 1;
        }

        Ok(stats)
    }

    async fn recreate_table(&self, table: &str, columns: &[ColumnName]) -> sheetsync_engine::Result<()> {
        self.recreated.fetch_add(1, Ordering::SeqCst);
        self.tables.lock().unwrap().insert(
            table.to_string(),
            MemTable {
                columns: names(columns),
                rows: Vec::new(),
            },
        );
        Ok(())
    }
}

// ============================================================================
// Ledger fake
// ============================================================================

#[derive(Default)]
pub struct MemoryLedger {
    pub started: Mutex<Vec<RunRecord>>,
    pub finished: Mutex<Vec<RunRecord>>,
    pub tables: Mutex<Vec<TableStat>>,
    pub violations: Mutex<Vec<(Uuid, String, Violation)>>,
    /// `(spreadsheet_id, table, records)`
    pub dumps: Mutex<Vec<(String, String, Value)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_run(&self) -> RunRecord {
        self.finished.lock().unwrap().last().cloned().unwrap()
    }

    pub fn is_untouched(&self) -> bool {
        self.started.lock().unwrap().is_empty()
            && self.finished.lock().unwrap().is_empty()
            && self.tables.lock().unwrap().is_empty()
            && self.violations.lock().unwrap().is_empty()
            && self.dumps.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl RunLedger for MemoryLedger {
    async fn start_run(&self, record: &RunRecord) -> sheetsync_engine::Result<()> {
        self.started.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn record_table(&self, stat: &TableStat) -> sheetsync_engine::Result<()> {
        self.tables.lock().unwrap().push(stat.clone());
        Ok(())
    }

    async fn log_violations(&self, run_id: Uuid, table: &str, violations: &[Violation]) -> sheetsync_engine::Result<()> {
        let mut log = self.violations.lock().unwrap();
        for violation in violations {
            log.push((run_id, table.to_string(), violation.clone()));
        }
        Ok(())
    }

    async fn dump_raw(&self, _run_id: Uuid, spreadsheet_id: &str, table: &ExtractedTable) -> sheetsync_engine::Result<()> {
        self.dumps
            .lock()
            .unwrap()
            .push((spreadsheet_id.to_string(), table.table.clone(), table.to_records()));
        Ok(())
    }

    async fn finish_run(&self, record: &RunRecord) -> sheetsync_engine::Result<()> {
        self.finished.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Everything an orchestrator scenario needs, fakes kept reachable
pub struct Harness {
    pub sheets: Arc<FakeSheetSource>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MemoryLedger>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("contracts")).unwrap();
        Self {
            sheets: Arc::new(FakeSheetSource::new()),
            store: Arc::new(MemoryStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
            dir,
        }
    }

    pub fn write_contract(&self, entity: &str, json: &str) {
        std::fs::write(self.contracts_dir().join(format!("{}.json", entity)), json).unwrap();
    }

    pub fn contracts_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("contracts")
    }

    pub fn lock_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Extractor::new(self.sheets.clone(), RetryPolicy::none()),
            self.store.clone(),
            self.ledger.clone(),
            ContractStore::new(self.contracts_dir()),
            Validator::new().unwrap(),
            ProcessLock::new(self.lock_dir(), "sheetsync"),
        )
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the bookkeeping migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sheetsync_engine::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}
