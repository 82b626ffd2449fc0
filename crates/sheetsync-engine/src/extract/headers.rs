//! Header detection and row alignment

use super::SourceRow;
use crate::error::SourceError;
use sheetsync_common::naming::slugify;
use std::collections::HashSet;

/// Leading rows searched for an `auto` header
pub const HEADER_SCAN_ROWS: usize = 20;

/// Position of the header row within `values`.
///
/// A row qualifies when its slugified cells contain every slugified marker.
/// Title blocks above the table sometimes repeat the marker words, so the
/// lowest qualifying row wins.
pub fn locate_header(values: &[Vec<String>], markers: &[String]) -> Result<usize, SourceError> {
    let wanted: HashSet<String> = markers.iter().map(|m| slugify(m)).collect();

    let found = values
        .iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .filter(|(_, row)| {
            let cells: HashSet<String> = row
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| slugify(c))
                .collect();
            wanted.is_subset(&cells)
        })
        .map(|(idx, _)| idx)
        .last();

    found.ok_or_else(|| SourceError::HeaderNotFound {
        markers: markers.to_vec(),
        scanned: values.len().min(HEADER_SCAN_ROWS),
    })
}

/// Rows below `header_idx`, padded with `None` or truncated to `width`.
/// Blank cells become `None`; rows with nothing left are dropped.
/// `row_index` is the 1-based position within the fetched range.
pub fn align_rows(values: Vec<Vec<String>>, header_idx: usize, width: usize) -> Vec<SourceRow> {
    values
        .into_iter()
        .enumerate()
        .skip(header_idx + 1)
        .filter_map(|(idx, raw)| {
            let mut cells: Vec<Option<String>> = raw
                .into_iter()
                .take(width)
                .map(|c| if c.trim().is_empty() { None } else { Some(c) })
                .collect();
            cells.resize(width, None);

            if cells.iter().all(Option::is_none) {
                return None;
            }

            Some(SourceRow {
                row_index: i32::try_from(idx + 1).unwrap_or(i32::MAX),
                values: cells,
            })
        })
        .collect()
}
