//! Sheetsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the sheetsync workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by every sheetsync component:
//!
//! - **Error Handling**: Common error type and result alias
//! - **Fingerprints**: Stable content hashes for spreadsheet rows
//! - **Naming**: Conversion of raw header labels into SQL-friendly column names
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: Shared enums for sync modes, run status and table outcomes
//!
//! # Example
//!
//! ```no_run
//! use sheetsync_common::fingerprint::fingerprint;
//! use sheetsync_common::naming::normalize_headers;
//!
//! let columns = normalize_headers(&["Client Name", "Phone"]);
//! let digest = fingerprint(&[Some("Alice"), Some("  555-01 ")]);
//! println!("{:?} -> {}", columns, digest);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod naming;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use naming::ColumnName;
