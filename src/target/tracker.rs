//! Constructor-based instance tracking, consulted read-only by the census.
//!
//! Trackers are created, paused, resumed and torn down by the external
//! debugger session lifecycle. The engine only registers them and asks
//! whether a class is currently trackable; it never drives the lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::{CandidateRef, ClassToken};

/// Lifecycle contract of a per-class constructor instance tracker.
///
/// Implementations live outside the engine (they plant constructor
/// breakpoints in the target). The census treats a class as "trackable" when
/// a registered tracker reports ready.
pub trait ConstructorInstanceTracker: Send + Sync {
    /// Starts tracking new instances.
    fn enable(&self);

    /// Stops tracking; already tracked instances are kept.
    fn disable(&self);

    /// Switches between foreground and background tracking mode
    /// (background trackers keep counting while the session runs).
    fn set_background_mode(&self, background: bool);

    /// Whether the tracker has finished arming and can answer queries.
    fn is_ready(&self) -> bool;

    /// Number of instances tracked since the last commit.
    fn count(&self) -> i64;

    /// Instances created since the last commit.
    fn new_instances(&self) -> Vec<CandidateRef>;

    /// Accepts the current set of tracked instances as the new baseline.
    fn commit_tracked(&self);

    /// Marks tracked data as stale (e.g. after the target resumed).
    fn obsolete(&self);

    /// Releases target-side resources. The tracker is unusable afterwards.
    fn dispose(&self);
}

/// Registry of trackers keyed by class, shared between the session lifecycle
/// (writer) and the census view (reader).
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: RwLock<HashMap<ClassToken, Arc<dyn ConstructorInstanceTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tracker for a class, replacing any previous one.
    /// The replaced tracker is returned so the caller can dispose it.
    pub fn register(
        &self,
        class: ClassToken,
        tracker: Arc<dyn ConstructorInstanceTracker>,
    ) -> Option<Arc<dyn ConstructorInstanceTracker>> {
        self.trackers.write().unwrap().insert(class, tracker)
    }

    /// Removes the tracker for a class, if any.
    pub fn remove(&self, class: ClassToken) -> Option<Arc<dyn ConstructorInstanceTracker>> {
        self.trackers.write().unwrap().remove(&class)
    }

    /// The tracker registered for a class, if any.
    pub fn get(&self, class: ClassToken) -> Option<Arc<dyn ConstructorInstanceTracker>> {
        self.trackers.read().unwrap().get(&class).cloned()
    }

    /// Whether a ready tracker is registered for this class.
    pub fn is_trackable(&self, class: ClassToken) -> bool {
        self.trackers
            .read()
            .unwrap()
            .get(&class)
            .is_some_and(|t| t.is_ready())
    }

    /// Propagates a session pause/resume to every tracker.
    pub fn set_background_mode(&self, background: bool) {
        for tracker in self.trackers.read().unwrap().values() {
            tracker.set_background_mode(background);
        }
    }

    /// Disposes and drops every tracker (session stop).
    pub fn dispose_all(&self) {
        let mut trackers = self.trackers.write().unwrap();
        for tracker in trackers.values() {
            tracker.dispose();
        }
        trackers.clear();
    }
}
