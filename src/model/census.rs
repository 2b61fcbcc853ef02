//! Census entries and the atomically published snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::class::{ClassInfo, ClassToken};

/// Instance-count state of one class across the last two censuses.
///
/// `Unknown` means the class has never been measured: either no counted
/// census has covered it yet, or the target cannot report instance counts
/// at all (names-only degraded census).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CensusEntry {
    /// Never measured.
    #[default]
    Unknown,
    /// Measured in at least one census.
    Known {
        /// Count observed by the previous census.
        previous: i64,
        /// Count observed by the current census.
        current: i64,
    },
}

impl CensusEntry {
    /// Entry for a class first seen before any census completed:
    /// the first observation establishes a baseline, not a delta.
    pub fn baseline(count: i64) -> Self {
        CensusEntry::Known {
            previous: count,
            current: count,
        }
    }

    /// Entry for a class that appeared after the store was initialized:
    /// the whole count is reported as new instances.
    pub fn appeared(count: i64) -> Self {
        CensusEntry::Known {
            previous: 0,
            current: count,
        }
    }

    /// Carries this entry into the next census with a fresh count.
    /// The old current count becomes the new previous count.
    pub fn advanced(&self, count: i64) -> Self {
        match self {
            CensusEntry::Unknown => CensusEntry::appeared(count),
            CensusEntry::Known { current, .. } => CensusEntry::Known {
                previous: *current,
                current: count,
            },
        }
    }

    /// Current minus previous count; 0 for unmeasured classes.
    pub fn diff(&self) -> i64 {
        match self {
            CensusEntry::Unknown => 0,
            CensusEntry::Known { previous, current } => current - previous,
        }
    }

    /// Current count, if this class has been measured.
    pub fn current(&self) -> Option<i64> {
        match self {
            CensusEntry::Unknown => None,
            CensusEntry::Known { current, .. } => Some(*current),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, CensusEntry::Unknown)
    }
}

/// One complete census: the ordered class list of the current pass plus a
/// per-class entry map.
///
/// A snapshot is immutable after publication. The store replaces the whole
/// snapshot behind an `Arc` on every merge; readers hold either the fully
/// prior or the fully new one, never a partial state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CensusSnapshot {
    /// Unix timestamp (seconds since epoch) when this census was taken.
    pub timestamp: i64,
    /// Classes visible in this census, in enumeration order.
    classes: Vec<ClassInfo>,
    /// Entry per visible class.
    entries: HashMap<ClassToken, CensusEntry>,
}

impl CensusSnapshot {
    pub fn new(
        timestamp: i64,
        classes: Vec<ClassInfo>,
        entries: HashMap<ClassToken, CensusEntry>,
    ) -> Self {
        Self {
            timestamp,
            classes,
            entries,
        }
    }

    /// Classes visible in this census, in enumeration order.
    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    /// Entry for a class; `Unknown` for classes not covered by this census.
    pub fn entry(&self, token: ClassToken) -> CensusEntry {
        self.entries.get(&token).copied().unwrap_or_default()
    }

    /// Number of classes visible in this census.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
