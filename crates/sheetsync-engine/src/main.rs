//! Sheetsync - spreadsheet to PostgreSQL sync

use anyhow::{Context, Result};
use clap::Parser;
use sheetsync_common::logging::{init_logging, LogConfig, LogLevel};
use sheetsync_engine::config::Config;
use sheetsync_engine::db::{create_pool, run_migrations, PgRunLedger};
use sheetsync_engine::export::Exporter;
use sheetsync_engine::extract::{Extractor, GoogleSheetsClient, RetryPolicy, SheetSource};
use sheetsync_engine::load::PgTargetStore;
use sheetsync_engine::lock::{ConflictPolicy, ProcessLock, DEFAULT_KILL_GRACE};
use sheetsync_engine::shutdown::shutdown_signal;
use sheetsync_engine::sources::SourcesFile;
use sheetsync_engine::transform::TransformRunner;
use sheetsync_engine::validate::{ContractStore, Validator};
use sheetsync_engine::{Orchestrator, RunOptions, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sheetsync")]
#[command(author, version, about = "Sync spreadsheet tabs into PostgreSQL staging tables")]
struct Cli {
    /// Sources file (defaults to SHEETSYNC_SOURCES, then sources.yml)
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Skip extraction and loading, only run transforms and exports
    #[arg(long, alias = "transform-only")]
    skip_extraction: bool,

    /// Skip the downstream SQL transforms
    #[arg(long)]
    skip_transform: bool,

    /// Skip exporting views back to sheets
    #[arg(long)]
    skip_export: bool,

    /// Truncate and reload every table instead of applying deltas
    #[arg(long)]
    force_full_reload: bool,

    /// Extract, validate and compute changes without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Drop and recreate staging tables from sheet headers (destroys data)
    #[arg(long)]
    deploy_schema: bool,

    /// Only sync these tables (full or unqualified names)
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Wait up to SECS for a running sync to finish
    #[arg(long, value_name = "SECS", conflicts_with = "kill_existing")]
    wait: Option<u64>,

    /// Terminate a running sync and take over its lock
    #[arg(long)]
    kill_existing: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn lock_policy(&self) -> ConflictPolicy {
        match (self.wait, self.kill_existing) {
            (Some(secs), _) => ConflictPolicy::Wait(Duration::from_secs(secs)),
            (None, true) => ConflictPolicy::KillOwner {
                grace: DEFAULT_KILL_GRACE,
            },
            (None, false) => ConflictPolicy::FailFast,
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            skip_extraction: self.skip_extraction,
            skip_transform: self.skip_transform,
            skip_export: self.skip_export,
            force_full_reload: self.force_full_reload,
            dry_run: self.dry_run,
            deploy_schema: self.deploy_schema,
            scope: self.tables.clone(),
            lock_policy: self.lock_policy(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_else(|_| {
        LogConfig::builder()
            .log_file_prefix("sheetsync".to_string())
            .build()
    });
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(sources) = &cli.sources {
        config.paths.sources = sources.clone();
    }

    let sources = SourcesFile::load(&config.paths.sources)?;
    info!("Loaded sources from {}", config.paths.sources.display());

    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let sheets: Arc<dyn SheetSource> = Arc::new(GoogleSheetsClient::new(&config.sheets)?);
    let policy = RetryPolicy::linear(config.sheets.retry_attempts, config.sheets.retry_base_delay());

    let target = PgTargetStore::new(pool.clone()).with_statement_timeout(config.database.statement_timeout());
    let ledger = PgRunLedger::new(pool.clone());
    let validator = Validator::new().context("Failed to compile validation patterns")?;

    let mut orchestrator = Orchestrator::new(
        Extractor::new(Arc::clone(&sheets), policy.clone()),
        Arc::new(target),
        Arc::new(ledger),
        ContractStore::new(&config.paths.contracts_dir),
        validator,
        ProcessLock::new(&config.paths.lock_dir, &config.paths.lock_name),
    )
    .with_exporter(Exporter::new(pool.clone(), sheets, policy));

    if let Some(dir) = &config.paths.transform_dir {
        orchestrator = orchestrator.with_transform(TransformRunner::new(pool.clone(), dir));
    }

    let options = cli.run_options();
    if options.deploy_schema && !options.dry_run {
        warn!("--deploy-schema drops and recreates every selected staging table");
    }

    let code = match orchestrator.run_until(&sources, &options, shutdown_signal()).await {
        Ok(summary) if summary.is_success() => {
            info!(
                "✓ Sync finished: {} tables, {} rows synced",
                summary.record.tables_processed, summary.record.total_rows_synced
            );
            ExitCode::SUCCESS
        },
        Ok(summary) => {
            error!("✗ Sync finished with failures: {}", summary.failed_tables().join(", "));
            ExitCode::FAILURE
        },
        Err(SyncError::Interrupted) => {
            warn!("Sync interrupted");
            ExitCode::from(130)
        },
        Err(e) => {
            error!("✗ Sync failed: {}", e);
            ExitCode::FAILURE
        },
    };

    pool.close().await;
    Ok(code)
}
