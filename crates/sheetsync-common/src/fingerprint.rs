//! Row fingerprints for change detection
//!
//! A fingerprint is the MD5 digest of a row's normalized cell values. It is a
//! change detector, not a security boundary: two rows with the same business
//! content always produce the same digest, no matter how the cells were padded
//! with whitespace or whether blanks arrived as nulls or empty strings.
//!
//! The serialized layout (`["a", "b"]`) is fixed. Digests are persisted in the
//! `__row_hash` column and compared across runs, so changing the layout would
//! turn every stored row into an update.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a hex-encoded MD5 digest
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Hex-encoded MD5 digest of a normalized row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest (e.g. one read back from the warehouse)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Fingerprint {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<String> for Fingerprint {
    fn eq(&self, other: &String) -> bool {
        &self.0 == other
    }
}

/// Normalize a single cell value for hashing.
///
/// Null and empty are the same thing. Leading/trailing whitespace is removed
/// and internal runs of whitespace collapse to a single space.
pub fn normalize_value(value: Option<&str>) -> String {
    match value {
        None => String::new(),
        Some(v) => v.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Compute the fingerprint of a row
pub fn fingerprint<S: AsRef<str>>(values: &[Option<S>]) -> Fingerprint {
    fingerprint_excluding(values, &[])
}

/// Compute the fingerprint of a row, skipping the cells at `excluded` positions.
///
/// Used for columns that change on every edit (timestamps, editor names) and
/// must not register as content changes.
pub fn fingerprint_excluding<S: AsRef<str>>(values: &[Option<S>], excluded: &[usize]) -> Fingerprint {
    let normalized: Vec<String> = values
        .iter()
        .enumerate()
        .filter(|(idx, _)| !excluded.contains(idx))
        .map(|(_, v)| normalize_value(v.as_ref().map(AsRef::as_ref)))
        .collect();

    let digest = md5::compute(serialize(&normalized).as_bytes());
    Fingerprint(format!("{:x}", digest))
}

fn serialize(values: &[String]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| serde_json::Value::String(v.clone()).to_string())
        .collect();
    format!("[{}]", items.join(", "))
}
