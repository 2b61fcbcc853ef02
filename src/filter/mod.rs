//! Cancellable, chunked instance filtering.
//!
//! A filter run evaluates a user-supplied predicate over the candidate
//! instances of one class on a background worker, streaming matches to the
//! UI in bounded chunks. Per-candidate evaluation errors are isolated into a
//! trailing error group; the run always ends with exactly one completion
//! reason.

mod aggregator;
mod coordinator;

pub use aggregator::FilterRunAggregator;
pub use coordinator::{FilterRunCoordinator, drive_filter};

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::model::{CandidateRef, CompletionReason, RunId};

/// What the aggregator tells the engine to do after one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep feeding candidates.
    Continue,
    /// Stop enumerating and report completion.
    Stop,
}

/// The per-item callback protocol a filter engine drives.
///
/// The engine must call [`started`](Self::started) exactly once before
/// anything else, then exactly one of `matched`/`not_matched`/`error` per
/// candidate in enumeration order, and finally
/// [`completed`](Self::completed) exactly once: as soon as any callback
/// returns [`Action::Stop`], when candidates are exhausted, or when the run
/// is cancelled, with the matching reason.
pub trait FilterListener {
    fn started(&mut self, total: usize);
    fn matched(&mut self, candidate: CandidateRef) -> Action;
    fn not_matched(&mut self, candidate: CandidateRef) -> Action;
    fn error(&mut self, candidate: CandidateRef, description: &str) -> Action;
    fn completed(&mut self, reason: CompletionReason);
}

/// One failed evaluation, kept apart from the matched results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalError {
    pub description: String,
    pub candidate: CandidateRef,
}

/// UI-facing output of a filter run. Every event carries the run identity so
/// stale output from a superseded run can be recognized and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterEvent {
    /// The run began; the progress indicator should appear.
    Started { run: RunId, total: usize },
    /// A bounded batch of matched candidates, in enumeration order.
    MatchChunk {
        run: RunId,
        candidates: Vec<CandidateRef>,
    },
    /// The trailing error group, delivered after all matched chunks.
    ErrorGroup { run: RunId, errors: Vec<EvalError> },
    /// Throttled progress update.
    Progress {
        run: RunId,
        fraction: f64,
        text: String,
    },
    /// The run ended; the progress indicator should disappear and the
    /// "run filter" control be re-enabled.
    Completed {
        run: RunId,
        reason: CompletionReason,
        matched: usize,
        errors: usize,
        text: String,
    },
}

impl FilterEvent {
    /// The run this event belongs to.
    pub fn run(&self) -> RunId {
        match self {
            FilterEvent::Started { run, .. }
            | FilterEvent::MatchChunk { run, .. }
            | FilterEvent::ErrorGroup { run, .. }
            | FilterEvent::Progress { run, .. }
            | FilterEvent::Completed { run, .. } => *run,
        }
    }
}

/// Receives filter events on behalf of the UI.
///
/// Implementations dispatch onto a single UI execution context; the worker
/// never mutates UI state directly.
pub trait EventSink: Send + Sync {
    fn post(&self, event: FilterEvent);
}

/// Sink that forwards events over a channel drained by the UI thread.
pub struct ChannelSink {
    tx: mpsc::Sender<FilterEvent>,
}

impl ChannelSink {
    /// Creates the sink plus the receiver the UI thread drains.
    pub fn channel() -> (Self, mpsc::Receiver<FilterEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn post(&self, event: FilterEvent) {
        // The UI going away mid-run is not the worker's problem.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_run_accessor() {
        let run = RunId::from_raw(3);
        let event = FilterEvent::Started { run, total: 10 };
        assert_eq!(event.run(), run);
        let event = FilterEvent::Completed {
            run,
            reason: CompletionReason::AllChecked,
            matched: 1,
            errors: 0,
            text: String::new(),
        };
        assert_eq!(event.run(), run);
    }

    #[test]
    fn test_channel_sink_round_trip() {
        let (sink, rx) = ChannelSink::channel();
        let run = RunId::from_raw(1);
        sink.post(FilterEvent::Started { run, total: 2 });
        match rx.recv().unwrap() {
            FilterEvent::Started { total, .. } => assert_eq!(total, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
