//! Trait boundary to the introspected target process.
//!
//! The engine never talks to a live process directly. Class enumeration,
//! instance counting, candidate enumeration, predicate evaluation and
//! constructor tracking are all reached through the traits defined here.
//! Production backends wrap the debugger wire protocol; tests and the demo
//! daemon use the in-memory [`mock::MockDebuggee`].

pub mod mock;
mod tracker;

pub use tracker::{ConstructorInstanceTracker, TrackerRegistry};

use crate::model::{CandidateRef, ClassInfo, ClassToken};

/// Error types for target-process interactions.
#[derive(Debug, Clone)]
pub enum TargetError {
    /// The target is gone or not responding.
    Unavailable(String),
    /// An instance-count query failed for a whole batch.
    CountFailed(String),
    /// Class or instance enumeration failed.
    Enumeration(String),
    /// The target replied with something the engine cannot use
    /// (e.g. a count batch of the wrong length).
    Protocol(String),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Unavailable(msg) => write!(f, "target unavailable: {}", msg),
            TargetError::CountFailed(msg) => write!(f, "instance count failed: {}", msg),
            TargetError::Enumeration(msg) => write!(f, "enumeration failed: {}", msg),
            TargetError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TargetError {}

/// Result of evaluating the filter predicate against one candidate.
///
/// Evaluation errors are per-candidate data, not failures: the run keeps
/// going and the error is grouped separately in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Matched,
    NotMatched,
    /// Evaluation failed for this candidate; the description is shown in the
    /// trailing error group.
    Error(String),
}

/// Enumerates loaded classes and candidate instances of one class.
pub trait CandidateEnumerator: Send + Sync {
    /// Lists all classes currently loaded in the target.
    fn loaded_classes(&self) -> Result<Vec<ClassInfo>, TargetError>;

    /// Lists up to `limit` live instances of the given class.
    fn instances_of(
        &self,
        class: ClassToken,
        limit: usize,
    ) -> Result<Vec<CandidateRef>, TargetError>;
}

/// Reports live instance counts for batches of classes.
pub trait InstanceCountProvider: Send + Sync {
    /// Whether the target can report per-class instance counts at all.
    /// When it cannot, the census degrades to a names-only listing.
    fn supports_instance_counts(&self) -> bool;

    /// Counts live instances for each class in `batch`, aligned by batch
    /// order. Fails for the whole batch or not at all.
    fn count_instances(&self, batch: &[ClassToken]) -> Result<Vec<i64>, TargetError>;
}

/// Evaluates the user-supplied filter expression against one candidate.
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(&self, candidate: &CandidateRef, expression: &str) -> EvalOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = TargetError::CountFailed("vm detached".to_string());
        assert_eq!(e.to_string(), "instance count failed: vm detached");
        let e = TargetError::Protocol("batch length mismatch".to_string());
        assert!(e.to_string().starts_with("protocol error"));
    }
}
