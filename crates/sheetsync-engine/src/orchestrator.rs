//! Run orchestrator
//!
//! One run: take the process lock, open a run record, sync every configured
//! table (extract, validate, reconcile, load), then run the transform and
//! export hooks. A table failure is recorded and the run moves on to the
//! next table; only lock and ledger failures abort the run as a whole.
//! The run record is finalized and the lock released on every path,
//! including an interrupt.

use crate::error::{Result, SyncError};
use crate::export::{ExportReport, Exporter};
use crate::extract::Extractor;
use crate::ledger::{RunLedger, RunRecord, TableStat};
use crate::load::TargetStore;
use crate::lock::{ConflictPolicy, ProcessLock};
use crate::sources::{SourcesFile, TableJob};
use crate::sync::{prepare_rows, reconcile, ChangeSet};
use crate::transform::{TransformReport, TransformRunner};
use crate::validate::{ContractStore, Validator};
use serde::Serialize;
use sheetsync_common::types::{RunMode, RunStatus, SyncMode, TableOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-run switches, usually straight from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run the transform and export hooks
    pub skip_extraction: bool,
    pub skip_transform: bool,
    pub skip_export: bool,
    /// Truncate and reload every table instead of applying deltas
    pub force_full_reload: bool,
    /// Extract, validate and reconcile, but write nothing anywhere
    pub dry_run: bool,
    /// Drop and recreate staging tables from the extracted headers
    pub deploy_schema: bool,
    /// Table names (full or without schema); empty means all
    pub scope: Vec<String>,
    pub lock_policy: ConflictPolicy,
}

impl RunOptions {
    pub fn run_mode(&self) -> RunMode {
        if self.force_full_reload || self.deploy_schema {
            RunMode::FullReload
        } else {
            RunMode::Cdc
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub record: RunRecord,
    pub tables: Vec<TableStat>,
    pub transform: Option<TransformReport>,
    pub exports: Vec<ExportReport>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.record.status == RunStatus::Success
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.outcome.is_failure())
            .map(|t| t.table_name.as_str())
            .collect()
    }
}

struct RunState {
    record: RunRecord,
    tables: Vec<TableStat>,
    transform: Option<TransformReport>,
    exports: Vec<ExportReport>,
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

pub struct Orchestrator {
    extractor: Extractor,
    target: Arc<dyn TargetStore>,
    ledger: Arc<dyn RunLedger>,
    contracts: ContractStore,
    validator: Validator,
    lock: ProcessLock,
    transform: Option<TransformRunner>,
    exporter: Option<Exporter>,
}

impl Orchestrator {
    pub fn new(
        extractor: Extractor,
        target: Arc<dyn TargetStore>,
        ledger: Arc<dyn RunLedger>,
        contracts: ContractStore,
        validator: Validator,
        lock: ProcessLock,
    ) -> Self {
        Self {
            extractor,
            target,
            ledger,
            contracts,
            validator,
            lock,
            transform: None,
            exporter: None,
        }
    }

    pub fn with_transform(mut self, transform: TransformRunner) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_exporter(mut self, exporter: Exporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run to completion
    pub async fn run(&self, sources: &SourcesFile, options: &RunOptions) -> Result<RunSummary> {
        self.run_until(sources, options, std::future::pending()).await
    }

    /// Run until done or until `shutdown` resolves. On shutdown the table in
    /// flight is dropped (its transaction rolls back), the record is closed
    /// as failed and [`SyncError::Interrupted`] is returned.
    pub async fn run_until<F>(&self, sources: &SourcesFile, options: &RunOptions, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let mut guard = self.lock.acquire(&options.lock_policy).await?;

        let mut state = RunState {
            record: RunRecord::start(options.run_mode()),
            tables: Vec::new(),
            transform: None,
            exports: Vec::new(),
        };

        info!(
            run_id = %state.record.run_id,
            mode = %state.record.mode,
            dry_run = options.dry_run,
            "Starting sync run"
        );

        if !options.dry_run {
            self.ledger.start_run(&state.record).await?;
        }

        let outcome = tokio::select! {
            result = self.run_phases(sources, options, &mut state) => result,
            _ = shutdown => {
                warn!("Interrupt received, abandoning run");
                Err(SyncError::Interrupted)
            },
        };

        let failed: Vec<&str> = state
            .tables
            .iter()
            .filter(|t| t.outcome.is_failure())
            .map(|t| t.table_name.as_str())
            .collect();

        let (status, message) = match &outcome {
            Err(SyncError::Interrupted) => (RunStatus::Failed, Some("interrupted".to_string())),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
            Ok(()) if !failed.is_empty() => (
                RunStatus::Failed,
                Some(format!(
                    "{} of {} tables failed: {}",
                    failed.len(),
                    state.tables.len(),
                    failed.join(", ")
                )),
            ),
            Ok(()) => (RunStatus::Success, None),
        };
        state.record.finish(status, message);

        if !options.dry_run {
            if let Err(e) = self.ledger.finish_run(&state.record).await {
                error!("Failed to finalize run {}: {}", state.record.run_id, e);
                if outcome.is_ok() {
                    guard.release();
                    return Err(e);
                }
            }
        }
        guard.release();

        let record = &state.record;
        info!(
            run_id = %record.run_id,
            status = %record.status,
            tables = record.tables_processed,
            rows_synced = record.total_rows_synced,
            validation_errors = record.validation_errors,
            "Run finished in {:.1}s",
            record.duration_seconds.unwrap_or_default()
        );

        outcome?;
        Ok(RunSummary {
            record: state.record,
            tables: state.tables,
            transform: state.transform,
            exports: state.exports,
        })
    }

    async fn run_phases(&self, sources: &SourcesFile, options: &RunOptions, state: &mut RunState) -> Result<()> {
        if options.skip_extraction {
            info!("Extraction skipped");
        } else {
            let jobs = sources.tables(&options.scope);
            if jobs.is_empty() {
                warn!("No configured tables match {:?}", options.scope);
            }

            for job in &jobs {
                let stat = self.sync_table(job, options, state.record.run_id).await;

                if !options.dry_run {
                    if let Err(e) = self.ledger.record_table(&stat).await {
                        error!("Failed to record stats for {}: {}", stat.table_name, e);
                    }
                }
                state.record.absorb(&stat);
                state.tables.push(stat);
            }
        }

        if options.dry_run {
            info!("Dry run: transform and export skipped");
            return Ok(());
        }

        match (&self.transform, options.skip_transform) {
            (Some(transform), false) => state.transform = Some(transform.run().await?),
            (Some(_), true) => info!("Transform skipped"),
            (None, _) => debug!("No transform directory configured"),
        }

        match (&self.exporter, options.skip_export) {
            (Some(exporter), false) if !sources.exports.is_empty() => {
                state.exports = exporter.export_all(&sources.exports).await;
            },
            (Some(_), true) => info!("Export skipped"),
            _ => debug!("Nothing to export"),
        }

        Ok(())
    }

    /// Sync one table. Never fails: errors end up in the returned stat.
    async fn sync_table(&self, job: &TableJob, options: &RunOptions, run_id: Uuid) -> TableStat {
        let started = Instant::now();
        let mut stat = TableStat::new(run_id, job.target_table());

        match self.sync_table_inner(job, options, &mut stat).await {
            Ok(outcome) => stat.outcome = outcome,
            Err(e) => {
                stat.outcome = match e {
                    SyncError::ValidationAbort { .. } => TableOutcome::Aborted,
                    _ => TableOutcome::Failed,
                };
                error!("✗ {} {}: {}", stat.table_name, stat.outcome, e);
                stat.error_message = Some(e.to_string());
            },
        }

        stat.duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        info!(
            table = %stat.table_name,
            outcome = %stat.outcome,
            duration_ms = stat.duration_ms,
            "{}",
            stat.summary_line()
        );
        stat
    }

    async fn sync_table_inner(&self, job: &TableJob, options: &RunOptions, stat: &mut TableStat) -> Result<TableOutcome> {
        let config = job
            .config
            .as_ref()
            .map_err(|e| SyncError::config(format!("{}: {}", job.label, e)))?;
        config.validate()?;
        let key = config.key_column()?;
        let table = config.target_table.as_str();

        let extracted = self.extractor.extract(&job.spreadsheet_id, config).await?;
        stat.rows_extracted = count(extracted.rows.len());

        let mut full_reload = options.force_full_reload || config.mode == SyncMode::Replace;

        if options.deploy_schema {
            if extracted.columns.is_empty() {
                warn!("No headers extracted for {}, staging table left as is", table);
            } else if options.dry_run {
                info!("Dry run: would recreate {} with {} columns", table, extracted.columns.len());
            } else {
                self.target.recreate_table(table, &extracted.columns).await?;
            }
            full_reload = true;
        }

        if extracted.is_empty() {
            info!("No rows extracted for {}, skipping", table);
            return Ok(TableOutcome::Skipped);
        }

        if !options.dry_run {
            if let Err(e) = self.ledger.dump_raw(stat.run_id, &job.spreadsheet_id, &extracted).await {
                warn!("Failed to dump raw rows of {}: {}", table, e);
            }
        }

        if config.skip_validation {
            debug!("Validation disabled for {}", table);
        } else {
            let contract = self.contracts.load(&config.contract_name())?;
            let report = self.validator.validate(&extracted, &contract);
            stat.validation_errors = count(report.violations.len());

            if !report.is_valid() {
                warn!(
                    "{}: {} violations, {}/{} rows valid ({:.1}% bad)",
                    table,
                    report.violations.len(),
                    report.valid_rows,
                    report.total_rows,
                    report.error_rate() * 100.0
                );
                if !options.dry_run {
                    if let Err(e) = self.ledger.log_violations(stat.run_id, table, &report.violations).await {
                        error!("Failed to log violations for {}: {}", table, e);
                    }
                }
            }

            self.validator.check_thresholds(table, &report)?;
        }

        let rows = prepare_rows(&extracted, &key, &config.fingerprint_exclude)?;

        if full_reload {
            if options.dry_run {
                stat.rows_inserted = count(rows.len());
                info!("Dry run: would reload {} with {} rows", table, rows.len());
            } else {
                let loaded = self.target.full_reload(table, &extracted.columns, &rows).await?;
                stat.rows_inserted = count(loaded.inserted);
            }
            return Ok(TableOutcome::Synced);
        }

        let prior = self.target.prior_state(table, &key).await?;
        let changes = reconcile(prior, rows);
        report_anomalies(table, &changes);
        stat.rows_unchanged = count(changes.unchanged);

        if options.dry_run {
            let would = changes.stats();
            stat.rows_inserted = count(would.inserts);
            stat.rows_updated = count(would.updates);
            stat.rows_deleted = count(would.deletes);
            info!(
                "Dry run: {} would get {} inserts, {} updates, {} deletes",
                table, would.inserts, would.updates, would.deletes
            );
            return Ok(TableOutcome::Synced);
        }

        let loaded = self
            .target
            .apply_change_set(table, &extracted.columns, &changes, &key)
            .await?;
        stat.rows_inserted = count(loaded.inserted);
        stat.rows_updated = count(loaded.updated);
        stat.rows_deleted = count(loaded.deleted);

        Ok(TableOutcome::Synced)
    }
}

fn report_anomalies(table: &str, changes: &ChangeSet) {
    if changes.skipped_without_key > 0 {
        warn!("{}: {} rows without a key were skipped", table, changes.skipped_without_key);
    }
    if changes.duplicates > 0 {
        warn!("{}: {} rows repeat an earlier key and were skipped", table, changes.duplicates);
    }
}
