//! Column naming
//!
//! Spreadsheet headers are free text, often Cyrillic, sometimes duplicated or
//! empty. This module turns them into unique, lowercase ASCII column names
//! that are safe to use as SQL identifiers.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Position of the row inside the fetched sheet range
pub const ROW_INDEX_COLUMN: &str = "_row_index";
/// Row fingerprint
pub const ROW_HASH_COLUMN: &str = "__row_hash";
/// Load timestamp
pub const LOADED_AT_COLUMN: &str = "_loaded_at";

/// Columns managed by the loader; no header may map onto them.
pub const RESERVED_COLUMNS: [&str; 3] = [ROW_INDEX_COLUMN, ROW_HASH_COLUMN, LOADED_AT_COLUMN];

/// PostgreSQL truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

const UNNAMED: &str = "col_unnamed";

/// A normalized column name: `[a-z][a-z0-9_]*`, at most 63 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnName(String);

impl ColumnName {
    /// Accept an already normalized name (e.g. from an explicit column mapping).
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| CommonError::InvalidColumnName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if RESERVED_COLUMNS.contains(&name.as_str()) {
            return Err(invalid("reserved for sync metadata"));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("longer than 63 bytes"));
        }
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() => {},
            Some(_) => return Err(invalid("must start with a lowercase letter")),
            None => return Err(invalid("empty")),
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(invalid("only a-z, 0-9 and '_' are allowed"));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ColumnName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ColumnName {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ColumnName> for String {
    fn from(value: ColumnName) -> Self {
        value.0
    }
}

impl PartialEq<str> for ColumnName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ColumnName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn transliterate(c: char) -> Option<&'static str> {
    let mapped = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' | 'ь' => "",
        'ы' => "y",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        ' ' | '-' | '/' => "_",
        '.' | ',' | '(' | ')' => "",
        _ => return None,
    };
    Some(mapped)
}

/// Convert a raw header label into snake_case ASCII.
///
/// `"Дата записи"` becomes `"data_zapisi"`, `"2024"` becomes `"col_2024"`,
/// and a label with nothing usable left becomes `"col_unnamed"`.
pub fn slugify(label: &str) -> String {
    let mut raw = String::with_capacity(label.len());
    for c in label.to_lowercase().chars() {
        match transliterate(c) {
            Some(mapped) => raw.push_str(mapped),
            None if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' => raw.push(c),
            None => {},
        }
    }

    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '_' && (slug.is_empty() || slug.ends_with('_')) {
            continue;
        }
        slug.push(c);
    }
    while slug.ends_with('_') {
        slug.pop();
    }

    if slug.is_empty() {
        return UNNAMED.to_string();
    }
    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug.insert_str(0, "col_");
    }
    slug.truncate(MAX_IDENTIFIER_LEN);
    slug
}

/// Normalize a full header row. Collisions get `_1`, `_2`, ... suffixes in
/// order of appearance.
pub fn normalize_headers<S: AsRef<str>>(headers: &[S]) -> Vec<ColumnName> {
    let slugs = headers.iter().map(|h| slugify(h.as_ref())).collect();
    dedupe(slugs)
}

/// Normalize headers, preferring explicit `mapping` entries (keyed by the raw
/// label, surrounding whitespace ignored) over slugification.
pub fn normalize_headers_with<S: AsRef<str>>(
    headers: &[S],
    mapping: &HashMap<String, String>,
) -> Result<Vec<ColumnName>> {
    if mapping.is_empty() {
        return Ok(normalize_headers(headers));
    }

    let trimmed: HashMap<&str, &str> = mapping
        .iter()
        .map(|(k, v)| (k.trim(), v.as_str()))
        .collect();

    let mut names = Vec::with_capacity(headers.len());
    for header in headers {
        let label = header.as_ref().trim();
        match trimmed.get(label) {
            Some(target) => names.push(ColumnName::parse(*target)?.0),
            None => names.push(slugify(label)),
        }
    }

    Ok(dedupe(names))
}

/// Identifiers for tables whose header row carries data rather than names
/// (e.g. a rates table keyed by dates): `col_0`, `col_1`, ...
pub fn positional_columns(count: usize) -> Vec<ColumnName> {
    (0..count).map(|i| ColumnName(format!("col_{}", i))).collect()
}

fn dedupe(names: Vec<String>) -> Vec<ColumnName> {
    let mut seen: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());

    for base in names {
        let mut candidate = base.clone();
        let mut counter = 1usize;
        while seen.contains(&candidate) {
            let suffix = format!("_{}", counter);
            let mut stem = base.clone();
            stem.truncate(MAX_IDENTIFIER_LEN - suffix.len());
            candidate = format!("{}{}", stem, suffix);
            counter += 1;
        }
        seen.insert(candidate.clone());
        out.push(ColumnName(candidate));
    }

    out
}
