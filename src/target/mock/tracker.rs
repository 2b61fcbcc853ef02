//! Scriptable constructor tracker for tests and demos.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::CandidateRef;
use crate::target::ConstructorInstanceTracker;

/// A constructor tracker whose state is set directly by the test instead of
/// by constructor breakpoints in a live target.
#[derive(Default)]
pub struct MockTracker {
    enabled: AtomicBool,
    ready: AtomicBool,
    background: AtomicBool,
    disposed: AtomicBool,
    tracked: Mutex<Vec<CandidateRef>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that is already armed and answering queries.
    pub fn ready() -> Self {
        let tracker = Self::new();
        tracker.ready.store(true, Ordering::SeqCst);
        tracker
    }

    /// Records a freshly constructed instance.
    pub fn track(&self, candidate: CandidateRef) {
        self.tracked.lock().unwrap().push(candidate);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl ConstructorInstanceTracker for MockTracker {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn set_background_mode(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_disposed()
    }

    fn count(&self) -> i64 {
        self.tracked.lock().unwrap().len() as i64
    }

    fn new_instances(&self) -> Vec<CandidateRef> {
        self.tracked.lock().unwrap().clone()
    }

    fn commit_tracked(&self) {
        self.tracked.lock().unwrap().clear();
    }

    fn obsolete(&self) {
        self.tracked.lock().unwrap().clear();
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.tracked.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_lifecycle() {
        let tracker = MockTracker::ready();
        assert!(tracker.is_ready());

        tracker.enable();
        tracker.track(CandidateRef::new(1));
        tracker.track(CandidateRef::new(2));
        assert_eq!(tracker.count(), 2);

        tracker.commit_tracked();
        assert_eq!(tracker.count(), 0);

        tracker.dispose();
        assert!(!tracker.is_ready());
    }
}
