//! Termination by signal
//!
//! Lives in its own test binary: SIGTERM is delivered to the whole process.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{rows, Harness};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sheetsync_common::types::RunStatus;
use sheetsync_engine::lock::{ConflictPolicy, ProcessLock};
use sheetsync_engine::shutdown::shutdown_signal;
use sheetsync_engine::sources::SourcesFile;
use sheetsync_engine::{RunOptions, SyncError};
use std::time::Duration;

#[tokio::test]
async fn test_sigterm_finalizes_run_and_releases_lock() {
    let h = Harness::new();
    h.write_contract(
        "clients",
        r#"{"columns": [{"name": "id", "type": "integer", "required": true}]}"#,
    );
    h.sheets.set_tab(0, "Clients", rows(&[&["ID"], &["1"]]));
    h.sheets.set_delay(Duration::from_secs(10));

    let sources = SourcesFile::parse(
        r#"
spreadsheets:
  sheet-1:
    sheets:
      - target_table: stg.clients
        gid: 0
        pk: id
"#,
    )
    .unwrap();

    let shutdown = shutdown_signal();
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let me = Pid::from_raw(std::process::id() as i32);
        kill(me, Signal::SIGTERM).unwrap();
    });

    let err = h
        .orchestrator()
        .run_until(&sources, &RunOptions::default(), shutdown)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Interrupted));
    let record = h.ledger.last_run();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("interrupted"));
    assert_eq!(h.store.writes(), 0);

    let lock = ProcessLock::new(h.lock_dir(), "sheetsync");
    assert!(lock.acquire(&ConflictPolicy::FailFast).await.is_ok());
}
