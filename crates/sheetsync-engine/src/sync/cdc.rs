//! Fingerprint reconciliation
//!
//! The reconciler owns its copy of the prior state. Every key seen in the
//! new extraction is removed from it; whatever is left at the end was
//! deleted at the source.

use super::types::{ChangeSet, PreparedRow, RowChange};
use std::collections::{HashMap, HashSet};

pub struct Reconciler {
    remaining: HashMap<String, String>,
    seen: HashSet<String>,
    changes: ChangeSet,
}

impl Reconciler {
    /// `prior` maps key to the fingerprint stored by the previous load
    pub fn new(prior: HashMap<String, String>) -> Self {
        Self {
            remaining: prior,
            seen: HashSet::new(),
            changes: ChangeSet::default(),
        }
    }

    pub fn process(&mut self, row: PreparedRow) {
        let Some(key) = row.key else {
            self.changes.skipped_without_key += 1;
            return;
        };

        if !self.seen.insert(key.clone()) {
            self.changes.duplicates += 1;
            return;
        }

        let change = RowChange {
            key,
            fingerprint: row.fingerprint,
            row: row.row,
        };

        match self.remaining.remove(&change.key) {
            Some(prior) if prior == change.fingerprint.as_str() => self.changes.unchanged += 1,
            Some(_) => self.changes.updates.push(change),
            None => self.changes.inserts.push(change),
        }
    }

    /// Close the pass: keys never seen become deletes
    pub fn finish(mut self) -> ChangeSet {
        let mut deletes: Vec<String> = self.remaining.into_keys().collect();
        deletes.sort();
        self.changes.deletes = deletes;
        self.changes
    }
}

/// One-shot reconciliation of `rows` against `prior`
pub fn reconcile(prior: HashMap<String, String>, rows: impl IntoIterator<Item = PreparedRow>) -> ChangeSet {
    let mut reconciler = Reconciler::new(prior);
    for row in rows {
        reconciler.process(row);
    }
    reconciler.finish()
}
