//! Filter-run model: run identity, candidates, completion.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Identity of one filter run. Events carry the run id so output arriving
/// after a run has been superseded or cancelled can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(u64);

impl RunId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// Opaque handle to one candidate instance in the target process, optionally
/// paired with its shallow size in bytes when the target can report one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateRef {
    /// Target-assigned instance identity.
    pub id: u64,
    /// Shallow size in bytes, if a sizing collaborator is available.
    pub size: Option<u64>,
}

impl CandidateRef {
    pub fn new(id: u64) -> Self {
        Self { id, size: None }
    }

    pub fn sized(id: u64, size: u64) -> Self {
        Self {
            id,
            size: Some(size),
        }
    }
}

/// Why a filter run ended. Exactly one reason is reported per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    /// Every candidate was evaluated.
    AllChecked,
    /// The run was cancelled before exhausting the candidates.
    Interrupted,
    /// The matched-result cap was reached.
    LimitReached,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionReason::AllChecked => write!(f, "all candidates checked"),
            CompletionReason::Interrupted => write!(f, "interrupted"),
            CompletionReason::LimitReached => write!(f, "limit reached"),
        }
    }
}

/// Shared state of one filter run.
///
/// The coordinator and the worker thread both hold an `Arc<FilterRun>`.
/// Cancellation is cooperative: `cancel()` raises a flag the worker checks
/// between candidates; the worker is never forcibly terminated.
#[derive(Debug)]
pub struct FilterRun {
    id: RunId,
    expression: String,
    cancelled: AtomicBool,
    completion: OnceLock<CompletionReason>,
}

impl FilterRun {
    pub fn new(id: RunId, expression: impl Into<String>) -> Self {
        Self {
            id,
            expression: expression.into(),
            cancelled: AtomicBool::new(false),
            completion: OnceLock::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// The user-supplied predicate expression, evaluated per candidate by the
    /// external evaluator.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Signals the worker to stop at the next between-candidates check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records the completion reason. Only the first call wins; later calls
    /// return `false` and leave the stored reason untouched.
    pub fn complete(&self, reason: CompletionReason) -> bool {
        self.completion.set(reason).is_ok()
    }

    /// The completion reason, once the run has ended.
    pub fn completion(&self) -> Option<CompletionReason> {
        self.completion.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let run = FilterRun::new(RunId::from_raw(1), "size > 16");
        assert!(!run.is_cancelled());
        run.cancel();
        assert!(run.is_cancelled());
        assert_eq!(run.expression(), "size > 16");
    }

    #[test]
    fn test_completion_set_once() {
        let run = FilterRun::new(RunId::from_raw(2), "true");
        assert_eq!(run.completion(), None);
        assert!(run.complete(CompletionReason::LimitReached));
        assert!(!run.complete(CompletionReason::AllChecked));
        assert_eq!(run.completion(), Some(CompletionReason::LimitReached));
    }

    #[test]
    fn test_completion_reason_text() {
        assert_eq!(CompletionReason::Interrupted.to_string(), "interrupted");
        assert_eq!(
            CompletionReason::AllChecked.to_string(),
            "all candidates checked"
        );
    }
}
