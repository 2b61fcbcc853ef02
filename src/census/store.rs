//! The census store: single writer, atomically published snapshots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::{CensusEntry, CensusSnapshot, ClassInfo};

/// Holds the current census and publishes a fresh immutable snapshot per
/// poll.
///
/// The poller is the only writer. Publication swaps a single `Arc`, so a
/// reader holds either the fully prior or the fully new snapshot; partial
/// merges are never observable. Entries are replaced wholesale on each merge,
/// never mutated in place.
pub struct CensusStore {
    snapshot: RwLock<Arc<CensusSnapshot>>,
    /// Whether at least one counted census has completed. Controls the
    /// baseline-vs-new-class asymmetry in [`merge`](Self::merge).
    initialized: AtomicBool,
}

impl CensusStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CensusSnapshot::default())),
            initialized: AtomicBool::new(false),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<CensusSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Whether a counted census has ever completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Marks the store initialized. Called by the poller after a successful
    /// counted merge.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Merges one counted census and publishes the resulting snapshot.
    ///
    /// `new_counts` carries (class, count) pairs in census order. For each
    /// class:
    /// - seen before: previous takes the old current count, current takes
    ///   the new count;
    /// - unseen, store never initialized: the first observation is a
    ///   baseline, previous == current, diff 0;
    /// - unseen, store initialized: the class genuinely appeared, previous
    ///   is forced to 0 and the whole count reads as new instances.
    ///
    /// Classes absent from `new_counts` are dropped from the snapshot.
    pub fn merge(
        &self,
        new_counts: Vec<(ClassInfo, i64)>,
        was_initialized_before: bool,
    ) -> Arc<CensusSnapshot> {
        let prior = self.snapshot();

        let mut classes = Vec::with_capacity(new_counts.len());
        let mut entries = HashMap::with_capacity(new_counts.len());
        for (class, count) in new_counts {
            let entry = match prior.entry(class.token) {
                known @ CensusEntry::Known { .. } => known.advanced(count),
                CensusEntry::Unknown if was_initialized_before => CensusEntry::appeared(count),
                CensusEntry::Unknown => CensusEntry::baseline(count),
            };
            entries.insert(class.token, entry);
            classes.push(class);
        }

        let snapshot = Arc::new(CensusSnapshot::new(
            chrono::Utc::now().timestamp(),
            classes,
            entries,
        ));
        *self.snapshot.write().unwrap() = snapshot.clone();
        snapshot
    }

    /// Publishes a degraded, names-only census: every listed class maps to
    /// [`CensusEntry::Unknown`]. Does not mark the store initialized, so the
    /// first counted census afterwards still establishes a baseline.
    pub fn publish_names_only(&self, classes: Vec<ClassInfo>) -> Arc<CensusSnapshot> {
        let entries = classes
            .iter()
            .map(|class| (class.token, CensusEntry::Unknown))
            .collect();
        let snapshot = Arc::new(CensusSnapshot::new(
            chrono::Utc::now().timestamp(),
            classes,
            entries,
        ));
        *self.snapshot.write().unwrap() = snapshot.clone();
        snapshot
    }
}

impl Default for CensusStore {
    fn default() -> Self {
        Self::new()
    }
}
