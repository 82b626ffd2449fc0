//! Sheetsync Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Synchronizes spreadsheet tabs into PostgreSQL staging tables, applying
//! only the rows that changed since the previous run.
//!
//! # Overview
//!
//! A run walks every configured table through the same stages:
//!
//! - **Extract** ([`extract`]): fetch the sheet, locate the header row,
//!   normalize column names, align rows
//! - **Validate** ([`validate`]): screen rows against a per-entity JSON contract,
//!   abort the table when the damage looks structural
//! - **Reconcile** ([`sync`]): compare row fingerprints with the previous load
//! - **Load** ([`load`]): apply inserts/updates/deletes, or truncate and reload,
//!   inside one transaction
//!
//! The [`orchestrator`] sequences those stages, records a run in the ledger
//! ([`ledger`], [`db`]) and holds the [`lock`] for the whole run so two syncs
//! never write the same tables at once.
//!
//! # Example
//!
//! ```no_run
//! use sheetsync_engine::config::Config;
//! use sheetsync_engine::sources::SourcesFile;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let sources = SourcesFile::load(&config.paths.sources)?;
//! for job in sources.tables(&[]) {
//!     println!("{} <- {}", job.target_table(), job.spreadsheet_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod extract;
pub mod ledger;
pub mod load;
pub mod lock;
pub mod orchestrator;
pub mod shutdown;
pub mod sources;
pub mod sync;
pub mod transform;
pub mod validate;

pub use error::{LockError, Result, SourceError, SyncError};
pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
