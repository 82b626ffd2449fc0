//! Downstream SQL transforms
//!
//! After the load phase every `*.sql` file of the transform directory runs
//! in file-name order, each in its own transaction. A failing script is
//! rolled back and logged; the next one still runs.

use crate::error::Result;
use serde::Serialize;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of one transform pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformReport {
    pub executed: Vec<String>,
    /// `(script, error)` pairs
    pub failed: Vec<(String, String)>,
}

impl TransformReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `*.sql` files directly under `dir`, sorted by file name
pub fn discover_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_sql = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"));
        if is_sql && path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(scripts)
}

pub struct TransformRunner {
    pool: PgPool,
    dir: PathBuf,
}

impl TransformRunner {
    pub fn new(pool: PgPool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run every script. Only an unreadable directory is an error.
    pub async fn run(&self) -> Result<TransformReport> {
        let scripts = discover_scripts(&self.dir)?;
        if scripts.is_empty() {
            warn!("No transform scripts in {}", self.dir.display());
            return Ok(TransformReport::default());
        }

        info!("Running {} transform scripts from {}", scripts.len(), self.dir.display());
        let mut report = TransformReport::default();

        for script in scripts {
            let name = script
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| script.display().to_string());

            match self.run_script(&script).await {
                Ok(()) => {
                    info!("✓ Transform {} done", name);
                    report.executed.push(name);
                },
                Err(e) => {
                    error!("✗ Transform {} failed: {}", name, e);
                    report.failed.push((name, e.to_string()));
                },
            }
        }

        info!(
            executed = report.executed.len(),
            failed = report.failed.len(),
            "Transform pass finished"
        );
        Ok(report)
    }

    async fn run_script(&self, path: &Path) -> Result<()> {
        let body = tokio::fs::read_to_string(path).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(&body).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_scripts_sorted_sql_only() {
        let dir = TempDir::new().unwrap();
        for name in ["20_marts.sql", "10_core.SQL", "notes.md", "05_cleanup.sql"] {
            std::fs::write(dir.path().join(name), "select 1;").unwrap();
        }
        std::fs::create_dir(dir.path().join("99_dir.sql")).unwrap();

        let names: Vec<String> = discover_scripts(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["05_cleanup.sql", "10_core.SQL", "20_marts.sql"]);
    }

    #[test]
    fn test_discover_scripts_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(discover_scripts(&dir.path().join("absent")).is_err());
    }
}
