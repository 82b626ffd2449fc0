//! Error taxonomy for the sync engine
//!
//! Transient source errors (rate limits, timeouts) are the only retryable
//! class. Target errors surface to the caller untouched: a statement that
//! timed out mid-transaction may already have done work server-side, so the
//! transaction is rolled back and never replayed.

use sheetsync_common::CommonError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures talking to the spreadsheet API
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Rate limited by spreadsheet API: {0}")]
    RateLimited(String),

    #[error("Spreadsheet API request timed out: {0}")]
    Timeout(String),

    #[error("Spreadsheet API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    NotFound(String),

    #[error("Failed to decode spreadsheet API response: {0}")]
    Decode(String),

    #[error("Spreadsheet API transport error: {0}")]
    Transport(String),

    #[error("No header row containing {markers:?} within the first {scanned} rows")]
    HeaderNotFound { markers: Vec<String>, scanned: usize },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_) | SourceError::Timeout(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            SourceError::RateLimited(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Process lock failures
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock {} is held by {}", .path.display(), owner_label(.owner))]
    Held { path: PathBuf, owner: Option<i32> },

    #[error(
        "Timed out after {waited_secs}s waiting for lock {} (held by {})",
        .path.display(),
        owner_label(.owner)
    )]
    Timeout {
        path: PathBuf,
        waited_secs: u64,
        owner: Option<i32>,
    },

    #[error("Lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal lock owner {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },
}

fn owner_label(owner: &Option<i32>) -> String {
    match owner {
        Some(pid) => format!("pid {}", pid),
        None => "an unknown process".to_string(),
    }
}

/// Main error type of the engine
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Target database error: {0}")]
    Target(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation aborted load of {table}: {reason} ({violations} violations)")]
    ValidationAbort {
        table: String,
        violations: usize,
        reason: String,
    },

    #[error("Unsafe SQL identifier '{identifier}': {reason}")]
    UnsafeIdentifier {
        identifier: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("Run interrupted")]
    Interrupted,
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    pub fn unsafe_identifier(identifier: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsafeIdentifier {
            identifier: identifier.into(),
            reason,
        }
    }

    /// Only transient source failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Source(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_source_errors_retry() {
        assert!(SyncError::from(SourceError::RateLimited("quota".into())).is_retryable());
        assert!(SyncError::from(SourceError::Timeout("30s".into())).is_retryable());
        assert!(!SyncError::from(SourceError::Http {
            status: 500,
            body: "boom".into()
        })
        .is_retryable());
        assert!(!SyncError::Target(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SyncError::unsafe_identifier("a;b", "bad").is_retryable());
    }

    #[test]
    fn test_lock_messages_name_the_owner() {
        let held = LockError::Held {
            path: PathBuf::from("logs/sheetsync.lock"),
            owner: Some(4242),
        };
        assert_eq!(held.to_string(), "Lock logs/sheetsync.lock is held by pid 4242");

        let timeout = LockError::Timeout {
            path: PathBuf::from("x.lock"),
            waited_secs: 5,
            owner: None,
        };
        assert!(timeout.to_string().contains("an unknown process"));
    }
}
