//! UI-agnostic census rows.
//!
//! Builds an ordered, filtered row set from a published snapshot. The UI (a
//! table widget, a web frontend) maps rows to its own widgets; nothing here
//! depends on a rendering framework.

use serde::{Deserialize, Serialize};

use crate::model::{CensusSnapshot, ClassToken};
use crate::target::TrackerRegistry;

/// Row predicate for the census table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusFilter {
    /// Show only classes whose count changed since the previous census.
    pub only_nonzero_diff: bool,
    /// Show only classes with at least one live instance.
    pub only_with_instances: bool,
    /// Show only classes with a ready constructor tracker.
    pub only_tracked: bool,
    /// Case-insensitive substring match on the class name.
    pub name_filter: Option<String>,
}

impl CensusFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One row of the census table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusRow {
    pub token: ClassToken,
    pub name: String,
    /// Live instance count; `None` when the target cannot report counts.
    pub current: Option<i64>,
    /// Change since the previous census.
    pub diff: i64,
    /// Whether instance details can be opened for this row.
    pub trackable: bool,
}

/// Classes passing the filter, ordered by
/// `(diff descending, current count descending, name ascending)`.
pub fn filtered_sorted_view<F>(
    snapshot: &CensusSnapshot,
    filter: &CensusFilter,
    is_tracked: F,
) -> Vec<ClassToken>
where
    F: Fn(ClassToken) -> bool,
{
    let name_filter = filter.name_filter.as_ref().map(|f| f.to_lowercase());

    let mut visible: Vec<_> = snapshot
        .classes()
        .iter()
        .filter(|class| {
            let entry = snapshot.entry(class.token);
            if filter.only_nonzero_diff && entry.diff() == 0 {
                return false;
            }
            if filter.only_with_instances && entry.current().unwrap_or(0) <= 0 {
                return false;
            }
            if filter.only_tracked && !is_tracked(class.token) {
                return false;
            }
            if let Some(needle) = &name_filter {
                if !class.name.to_lowercase().contains(needle) {
                    return false;
                }
            }
            true
        })
        .collect();

    visible.sort_by(|a, b| {
        let ea = snapshot.entry(a.token);
        let eb = snapshot.entry(b.token);
        eb.diff()
            .cmp(&ea.diff())
            // Unmeasured classes rank below a measured zero count.
            .then_with(|| eb.current().unwrap_or(-1).cmp(&ea.current().unwrap_or(-1)))
            .then_with(|| a.name.cmp(&b.name))
    });

    visible.into_iter().map(|class| class.token).collect()
}

/// Builds the census rows the UI renders, with per-row trackability taken
/// from the registry.
pub fn census_rows(
    snapshot: &CensusSnapshot,
    filter: &CensusFilter,
    trackers: &TrackerRegistry,
) -> Vec<CensusRow> {
    let names: std::collections::HashMap<ClassToken, &str> = snapshot
        .classes()
        .iter()
        .map(|class| (class.token, class.name.as_str()))
        .collect();

    filtered_sorted_view(snapshot, filter, |token| trackers.is_trackable(token))
        .into_iter()
        .map(|token| {
            let entry = snapshot.entry(token);
            CensusRow {
                token,
                name: names.get(&token).copied().unwrap_or_default().to_string(),
                current: entry.current(),
                diff: entry.diff(),
                trackable: trackers.is_trackable(token),
            }
        })
        .collect()
}
