//! The filter-run coordinator: one active run, cancel-then-start, stale
//! output discarded by run identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::model::{CandidateRef, ClassToken, CompletionReason, FilterRun, RunId};
use crate::sched::{CommandScheduler, Priority, run_on};
use crate::target::{CandidateEnumerator, EvalOutcome, PredicateEvaluator};

use super::{Action, EventSink, FilterEvent, FilterListener, FilterRunAggregator};

/// Drives one candidate set through a listener, observing the run's
/// cancellation flag between candidates.
///
/// This is the engine side of the callback protocol: `started` first, one
/// callback per candidate in order, and exactly one `completed`:
/// `Interrupted` when the cancellation flag is seen, `LimitReached` when a
/// callback returns [`Action::Stop`], `AllChecked` on exhaustion.
pub fn drive_filter<L, E>(
    run: &FilterRun,
    candidates: Vec<CandidateRef>,
    evaluate: E,
    listener: &mut L,
) where
    L: FilterListener,
    E: Fn(&CandidateRef) -> EvalOutcome,
{
    listener.started(candidates.len());
    for candidate in candidates {
        if run.is_cancelled() {
            listener.completed(CompletionReason::Interrupted);
            return;
        }
        let action = match evaluate(&candidate) {
            EvalOutcome::Matched => listener.matched(candidate),
            EvalOutcome::NotMatched => listener.not_matched(candidate),
            EvalOutcome::Error(description) => listener.error(candidate, &description),
        };
        if action == Action::Stop {
            listener.completed(CompletionReason::LimitReached);
            return;
        }
    }
    listener.completed(CompletionReason::AllChecked);
}

/// Sink wrapper that drops events whose run is no longer the active one.
///
/// The raw id of the active run is shared with the coordinator; `0` means no
/// run is active. A superseded or cancelled run keeps feeding events into
/// this wrapper, and they all die here instead of reaching the UI.
struct RunScopedSink {
    active_run: Arc<AtomicU64>,
    inner: Arc<dyn EventSink>,
}

impl EventSink for RunScopedSink {
    fn post(&self, event: FilterEvent) {
        if self.active_run.load(Ordering::SeqCst) == event.run().raw() {
            self.inner.post(event);
        } else {
            debug!("dropping stale filter event from {}", event.run());
        }
    }
}

struct ActiveRun {
    run: Arc<FilterRun>,
    /// Kept so tests and shutdown paths can wait for the worker; a cancelled
    /// run's handle is simply dropped (non-interrupting).
    worker: Option<JoinHandle<()>>,
}

struct CoordinatorShared {
    active: Mutex<Option<ActiveRun>>,
    /// Raw id of the active run; 0 when idle. Read by [`RunScopedSink`].
    active_run: Arc<AtomicU64>,
    next_run: AtomicU64,
}

impl CoordinatorShared {
    /// Clears the active slot when the given run finished naturally.
    /// A superseded run no longer matches and leaves the new run alone.
    fn finish(&self, id: RunId) {
        let mut active = self.active.lock().unwrap();
        let matches = active
            .as_ref()
            .is_some_and(|current| current.run.id() == id);
        if matches {
            *active = None;
            self.active_run.store(0, Ordering::SeqCst);
        }
    }
}

/// Owns at most one filter run at a time.
///
/// `start` cancels any active run before creating the new one; `cancel`
/// raises the run's flag and clears the stored references so late callbacks
/// from the old worker cannot touch state belonging to a newer run. All
/// target access (candidate enumeration, per-candidate evaluation) is
/// funneled through the command scheduler at [`Priority::Lowest`].
pub struct FilterRunCoordinator<T>
where
    T: CandidateEnumerator + PredicateEvaluator + Send + Sync + 'static,
{
    target: Arc<T>,
    scheduler: Arc<dyn CommandScheduler>,
    sink: Arc<dyn EventSink>,
    config: FilterConfig,
    shared: Arc<CoordinatorShared>,
}

impl<T> FilterRunCoordinator<T>
where
    T: CandidateEnumerator + PredicateEvaluator + Send + Sync + 'static,
{
    pub fn new(
        target: Arc<T>,
        scheduler: Arc<dyn CommandScheduler>,
        sink: Arc<dyn EventSink>,
        config: FilterConfig,
    ) -> Self {
        Self {
            target,
            scheduler,
            sink,
            config,
            shared: Arc::new(CoordinatorShared {
                active: Mutex::new(None),
                active_run: Arc::new(AtomicU64::new(0)),
                next_run: AtomicU64::new(1),
            }),
        }
    }

    /// Whether a run is currently active.
    pub fn is_running(&self) -> bool {
        self.shared.active.lock().unwrap().is_some()
    }

    /// Identity of the active run, if any.
    pub fn active_run_id(&self) -> Option<RunId> {
        self.shared
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|active| active.run.id())
    }

    /// Starts a filter run over the instances of `class`, cancelling any
    /// run still active.
    pub fn start(&self, class: ClassToken, expression: &str) -> RunId {
        let mut active = self.shared.active.lock().unwrap();
        if let Some(previous) = active.take() {
            debug!("superseding {} with a new filter run", previous.run.id());
            previous.run.cancel();
            // Handle dropped without joining: non-interrupting cancel.
        }

        let id = RunId::from_raw(self.shared.next_run.fetch_add(1, Ordering::SeqCst));
        let run = Arc::new(FilterRun::new(id, expression));
        self.shared.active_run.store(id.raw(), Ordering::SeqCst);

        let scoped: Arc<dyn EventSink> = Arc::new(RunScopedSink {
            active_run: self.shared.active_run.clone(),
            inner: self.sink.clone(),
        });

        let worker = {
            let run = run.clone();
            let target = self.target.clone();
            let scheduler = self.scheduler.clone();
            let shared = self.shared.clone();
            let config = self.config.clone();
            thread::spawn(move || {
                let mut aggregator = FilterRunAggregator::new(run.clone(), scoped, config.clone());
                run_worker(run, class, target, scheduler, config, &mut aggregator);
                shared.finish(id);
            })
        };

        *active = Some(ActiveRun {
            run,
            worker: Some(worker),
        });
        debug!("filter run {} started for {}", id, class);
        id
    }

    /// Cancels the active run, if any. Cooperative: the worker observes the
    /// flag between candidates; its remaining output is discarded by run
    /// identity, so after this returns no further UI state changes occur.
    pub fn cancel(&self) {
        let mut active = self.shared.active.lock().unwrap();
        if let Some(previous) = active.take() {
            previous.run.cancel();
            self.shared.active_run.store(0, Ordering::SeqCst);
            debug!("filter run {} cancelled", previous.run.id());
        }
    }

    /// Blocks until the active worker (if any) has finished. Used by tests
    /// and orderly shutdown; never called with the lock held by `start`.
    pub fn join_active(&self) {
        let worker = {
            let mut active = self.shared.active.lock().unwrap();
            active.as_mut().and_then(|active| active.worker.take())
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

/// Worker body: enumerate candidates, then evaluate each one, both through
/// the command queue so interactive debugger work keeps priority.
fn run_worker<T>(
    run: Arc<FilterRun>,
    class: ClassToken,
    target: Arc<T>,
    scheduler: Arc<dyn CommandScheduler>,
    config: FilterConfig,
    aggregator: &mut FilterRunAggregator,
) where
    T: CandidateEnumerator + PredicateEvaluator + Send + Sync + 'static,
{
    let candidates = {
        let target = target.clone();
        let limit = config.candidate_limit;
        run_on(scheduler.as_ref(), Priority::Lowest, move || {
            target.instances_of(class, limit)
        })
    };
    let candidates = match candidates {
        Some(Ok(candidates)) => candidates,
        Some(Err(e)) => {
            warn!("candidate enumeration failed: {}", e);
            aggregator.started(0);
            aggregator.completed(CompletionReason::Interrupted);
            return;
        }
        None => {
            warn!("command queue unavailable; abandoning filter run");
            aggregator.started(0);
            aggregator.completed(CompletionReason::Interrupted);
            return;
        }
    };

    let evaluate = |candidate: &CandidateRef| -> EvalOutcome {
        let target = target.clone();
        let run = run.clone();
        let candidate = *candidate;
        run_on(scheduler.as_ref(), Priority::Lowest, move || {
            target.evaluate(&candidate, run.expression())
        })
        .unwrap_or_else(|| EvalOutcome::Error("target command queue shut down".to_string()))
    };
    drive_filter(&run, candidates, evaluate, aggregator);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{Receiver, RecvTimeoutError};
    use std::time::Duration;

    use crate::filter::ChannelSink;
    use crate::model::ClassInfo;
    use crate::sched::{InlineScheduler, SerialCommandQueue};
    use crate::target::{TargetError, mock::MockDebuggee};

    const CLASS: ClassToken = ClassToken::from_raw(1);

    /// Target whose evaluations can be held open by the test.
    struct GatedTarget {
        candidates: Vec<CandidateRef>,
        paused: AtomicBool,
    }

    impl GatedTarget {
        fn new(n: usize, paused: bool) -> Self {
            Self {
                candidates: (1..=n as u64).map(CandidateRef::new).collect(),
                paused: AtomicBool::new(paused),
            }
        }

        fn release(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    impl CandidateEnumerator for GatedTarget {
        fn loaded_classes(&self) -> Result<Vec<ClassInfo>, TargetError> {
            Ok(vec![ClassInfo::new(CLASS, "test.Gated")])
        }

        fn instances_of(
            &self,
            _class: ClassToken,
            limit: usize,
        ) -> Result<Vec<CandidateRef>, TargetError> {
            Ok(self.candidates.iter().take(limit).copied().collect())
        }
    }

    impl PredicateEvaluator for GatedTarget {
        fn evaluate(&self, _candidate: &CandidateRef, _expression: &str) -> EvalOutcome {
            while self.paused.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            EvalOutcome::Matched
        }
    }

    struct FailingEnumerator;

    impl CandidateEnumerator for FailingEnumerator {
        fn loaded_classes(&self) -> Result<Vec<ClassInfo>, TargetError> {
            Ok(Vec::new())
        }

        fn instances_of(
            &self,
            _class: ClassToken,
            _limit: usize,
        ) -> Result<Vec<CandidateRef>, TargetError> {
            Err(TargetError::Enumeration("no such class".to_string()))
        }
    }

    impl PredicateEvaluator for FailingEnumerator {
        fn evaluate(&self, _candidate: &CandidateRef, _expression: &str) -> EvalOutcome {
            EvalOutcome::NotMatched
        }
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("timed out waiting for {}", what);
    }

    fn make_coordinator<T>(
        target: Arc<T>,
        config: FilterConfig,
    ) -> (FilterRunCoordinator<T>, Receiver<FilterEvent>)
    where
        T: CandidateEnumerator + PredicateEvaluator + Send + Sync + 'static,
    {
        let (sink, rx) = ChannelSink::channel();
        let coordinator = FilterRunCoordinator::new(
            target,
            Arc::new(InlineScheduler::new()),
            Arc::new(sink),
            config,
        );
        (coordinator, rx)
    }

    fn drain(rx: &Receiver<FilterEvent>) -> Vec<FilterEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_run_to_completion() {
        let target = Arc::new(GatedTarget::new(120, false));
        let config = FilterConfig {
            chunk_size: 50,
            max_flush_interval: Duration::from_secs(3600),
            progress_interval: Duration::from_secs(3600),
            ..FilterConfig::default()
        };
        let (coordinator, rx) = make_coordinator(target, config);

        let id = coordinator.start(CLASS, "true");
        wait_for("run completion", || !coordinator.is_running());

        let events = drain(&rx);
        assert!(events.iter().all(|e| e.run() == id));
        let delivered: usize = events
            .iter()
            .filter_map(|e| match e {
                FilterEvent::MatchChunk { candidates, .. } => Some(candidates.len()),
                _ => None,
            })
            .sum();
        assert_eq!(delivered, 120);
        assert!(matches!(
            events.last().unwrap(),
            FilterEvent::Completed {
                reason: CompletionReason::AllChecked,
                matched: 120,
                ..
            }
        ));
        assert_eq!(coordinator.active_run_id(), None);
    }

    #[test]
    fn test_cancel_suppresses_late_output() {
        let target = Arc::new(GatedTarget::new(3, true));
        let (coordinator, rx) = make_coordinator(target.clone(), FilterConfig::default());

        coordinator.start(CLASS, "true");
        // The run is live: it has announced itself and is now held open
        // inside the first evaluation.
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(FilterEvent::Started { total, .. }) => assert_eq!(total, 3),
            other => panic!("expected Started, got {:?}", other),
        }

        coordinator.cancel();
        assert!(!coordinator.is_running());
        drain(&rx);

        // Let the worker finish; everything it still emits must be dropped.
        target.release();
        match rx.recv_timeout(Duration::from_millis(300)) {
            Err(RecvTimeoutError::Timeout) => {}
            other => panic!("observable output after cancel: {:?}", other),
        }
    }

    #[test]
    fn test_start_supersedes_active_run() {
        let target = Arc::new(GatedTarget::new(5, true));
        let config = FilterConfig {
            progress_interval: Duration::from_secs(3600),
            ..FilterConfig::default()
        };
        let (coordinator, rx) = make_coordinator(target.clone(), config);

        let first = coordinator.start(CLASS, "true");
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(FilterEvent::Started { run, .. }) => assert_eq!(run, first),
            other => panic!("expected Started, got {:?}", other),
        }

        let second = coordinator.start(CLASS, "true");
        assert_ne!(first, second);
        assert_eq!(coordinator.active_run_id(), Some(second));

        target.release();
        wait_for("second run completion", || !coordinator.is_running());

        // The superseded run's late events were discarded; only the new
        // run's output reached the UI.
        let events = drain(&rx);
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.run() == second));
        assert!(events.iter().any(|e| matches!(
            e,
            FilterEvent::Completed {
                reason: CompletionReason::AllChecked,
                ..
            }
        )));
    }

    #[test]
    fn test_enumeration_failure_ends_run_quietly() {
        let (coordinator, rx) = make_coordinator(Arc::new(FailingEnumerator), FilterConfig::default());
        coordinator.start(CLASS, "true");
        wait_for("run completion", || !coordinator.is_running());

        let events = drain(&rx);
        assert!(matches!(events[0], FilterEvent::Started { total: 0, .. }));
        assert!(matches!(
            events.last().unwrap(),
            FilterEvent::Completed {
                reason: CompletionReason::Interrupted,
                ..
            }
        ));
    }

    #[test]
    fn test_end_to_end_with_serial_queue() {
        let target = Arc::new(MockDebuggee::typical_heap());
        let byte_array = target.define_class("byte[]");
        let (sink, rx) = ChannelSink::channel();
        let queue = Arc::new(SerialCommandQueue::new());
        let coordinator = FilterRunCoordinator::new(
            target,
            queue.clone(),
            Arc::new(sink),
            FilterConfig::default(),
        );

        // byte[] sizes are 16..16384; four of six exceed 100 bytes.
        coordinator.start(byte_array, "size > 100");
        wait_for("run completion", || !coordinator.is_running());

        let events = drain(&rx);
        match events.last().unwrap() {
            FilterEvent::Completed {
                reason,
                matched,
                errors,
                ..
            } => {
                assert_eq!(*reason, CompletionReason::AllChecked);
                assert_eq!(*matched, 4);
                assert_eq!(*errors, 0);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        queue.shutdown();
    }
}
