//! The in-memory mock target process.

use std::sync::Mutex;
use std::time::Duration;

use xxhash_rust::xxh3::xxh3_64;

use crate::model::{CandidateRef, ClassInfo, ClassToken};
use crate::target::{
    CandidateEnumerator, EvalOutcome, InstanceCountProvider, PredicateEvaluator, TargetError,
};

struct MockClass {
    token: ClassToken,
    name: String,
    instances: Vec<CandidateRef>,
}

struct MockHeap {
    /// Classes in definition order; enumeration reports them in this order.
    classes: Vec<MockClass>,
    counts_supported: bool,
    /// Count batches left to fail before queries succeed again.
    failing_count_batches: usize,
    /// When set, the batch after this many successful ones fails once.
    fail_after_batches: Option<usize>,
    /// Artificial latency added to every count batch.
    count_latency: Duration,
    /// Candidate ids whose evaluation fails with the given description.
    eval_errors: Vec<(u64, String)>,
    next_instance_id: u64,
}

/// In-memory stand-in for a suspended target process.
///
/// Class tokens are derived from the xxh3 hash of the class name, so the same
/// scenario always produces the same identities. The heap can be mutated
/// between censuses to produce visible diffs.
pub struct MockDebuggee {
    heap: Mutex<MockHeap>,
}

impl Default for MockDebuggee {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDebuggee {
    /// Creates an empty target with instance counting supported.
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(MockHeap {
                classes: Vec::new(),
                counts_supported: true,
                failing_count_batches: 0,
                fail_after_batches: None,
                count_latency: Duration::ZERO,
                eval_errors: Vec::new(),
                next_instance_id: 1,
            }),
        }
    }

    /// Defines a class (idempotent) and returns its token.
    pub fn define_class(&self, name: &str) -> ClassToken {
        let mut heap = self.heap.lock().unwrap();
        if let Some(class) = heap.classes.iter().find(|c| c.name == name) {
            return class.token;
        }
        let token = ClassToken::from_raw(xxh3_64(name.as_bytes()));
        heap.classes.push(MockClass {
            token,
            name: name.to_string(),
            instances: Vec::new(),
        });
        token
    }

    /// Removes a class and all its instances (class unloaded).
    pub fn unload_class(&self, class: ClassToken) {
        let mut heap = self.heap.lock().unwrap();
        heap.classes.retain(|c| c.token != class);
    }

    /// Allocates `n` instances of a class with a deterministic size
    /// progression (16, 32, .., 128 bytes, repeating).
    pub fn allocate(&self, class: ClassToken, n: usize) {
        let mut heap = self.heap.lock().unwrap();
        for _ in 0..n {
            let id = heap.next_instance_id;
            heap.next_instance_id += 1;
            let size = 16 * (1 + id % 8);
            if let Some(c) = heap.classes.iter_mut().find(|c| c.token == class) {
                c.instances.push(CandidateRef::sized(id, size));
            }
        }
    }

    /// Allocates one instance with an explicit size and returns its handle.
    pub fn allocate_sized(&self, class: ClassToken, size: u64) -> CandidateRef {
        let mut heap = self.heap.lock().unwrap();
        let id = heap.next_instance_id;
        heap.next_instance_id += 1;
        let candidate = CandidateRef::sized(id, size);
        if let Some(c) = heap.classes.iter_mut().find(|c| c.token == class) {
            c.instances.push(candidate);
        }
        candidate
    }

    /// Allocates one instance without size information.
    pub fn allocate_unsized(&self, class: ClassToken) -> CandidateRef {
        let mut heap = self.heap.lock().unwrap();
        let id = heap.next_instance_id;
        heap.next_instance_id += 1;
        let candidate = CandidateRef::new(id);
        if let Some(c) = heap.classes.iter_mut().find(|c| c.token == class) {
            c.instances.push(candidate);
        }
        candidate
    }

    /// Frees the most recently allocated `n` instances of a class.
    pub fn free(&self, class: ClassToken, n: usize) {
        let mut heap = self.heap.lock().unwrap();
        if let Some(c) = heap.classes.iter_mut().find(|c| c.token == class) {
            let keep = c.instances.len().saturating_sub(n);
            c.instances.truncate(keep);
        }
    }

    /// Toggles whether the target reports per-class instance counts.
    pub fn set_counts_supported(&self, supported: bool) {
        self.heap.lock().unwrap().counts_supported = supported;
    }

    /// Makes the next `n` count batches fail with a count error.
    pub fn fail_next_count_batches(&self, n: usize) {
        self.heap.lock().unwrap().failing_count_batches = n;
    }

    /// Lets `successes` count batches succeed, then fails the next one once.
    pub fn fail_count_batch_after(&self, successes: usize) {
        self.heap.lock().unwrap().fail_after_batches = Some(successes);
    }

    /// Adds artificial latency to every count batch, for pacing demos.
    pub fn set_count_latency(&self, latency: Duration) {
        self.heap.lock().unwrap().count_latency = latency;
    }

    /// Makes evaluation of one candidate fail with the given description.
    pub fn inject_eval_error(&self, candidate_id: u64, description: &str) {
        self.heap
            .lock()
            .unwrap()
            .eval_errors
            .push((candidate_id, description.to_string()));
    }
}

impl CandidateEnumerator for MockDebuggee {
    fn loaded_classes(&self) -> Result<Vec<ClassInfo>, TargetError> {
        let heap = self.heap.lock().unwrap();
        Ok(heap
            .classes
            .iter()
            .map(|c| ClassInfo::new(c.token, c.name.clone()))
            .collect())
    }

    fn instances_of(
        &self,
        class: ClassToken,
        limit: usize,
    ) -> Result<Vec<CandidateRef>, TargetError> {
        let heap = self.heap.lock().unwrap();
        let class = heap
            .classes
            .iter()
            .find(|c| c.token == class)
            .ok_or_else(|| TargetError::Enumeration(format!("unknown class {}", class)))?;
        Ok(class.instances.iter().take(limit).copied().collect())
    }
}

impl InstanceCountProvider for MockDebuggee {
    fn supports_instance_counts(&self) -> bool {
        self.heap.lock().unwrap().counts_supported
    }

    fn count_instances(&self, batch: &[ClassToken]) -> Result<Vec<i64>, TargetError> {
        let latency = {
            let mut heap = self.heap.lock().unwrap();
            if heap.failing_count_batches > 0 {
                heap.failing_count_batches -= 1;
                return Err(TargetError::CountFailed(
                    "simulated count failure".to_string(),
                ));
            }
            match heap.fail_after_batches {
                Some(0) => {
                    heap.fail_after_batches = None;
                    return Err(TargetError::CountFailed(
                        "simulated count failure".to_string(),
                    ));
                }
                Some(remaining) => heap.fail_after_batches = Some(remaining - 1),
                None => {}
            }
            heap.count_latency
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let heap = self.heap.lock().unwrap();
        Ok(batch
            .iter()
            .map(|token| {
                heap.classes
                    .iter()
                    .find(|c| c.token == *token)
                    // Class unloaded between enumeration and counting.
                    .map_or(0, |c| c.instances.len() as i64)
            })
            .collect())
    }
}

impl PredicateEvaluator for MockDebuggee {
    /// Evaluates a deliberately tiny expression language: `true`, `false`,
    /// `size > N` and `size < N`. Anything else fails per candidate, which is
    /// exactly how a real evaluator surfaces a broken expression.
    fn evaluate(&self, candidate: &CandidateRef, expression: &str) -> EvalOutcome {
        {
            let heap = self.heap.lock().unwrap();
            if let Some((_, description)) =
                heap.eval_errors.iter().find(|(id, _)| *id == candidate.id)
            {
                return EvalOutcome::Error(description.clone());
            }
        }
        match expression.trim() {
            "true" => EvalOutcome::Matched,
            "false" => EvalOutcome::NotMatched,
            expr => evaluate_size_predicate(candidate, expr),
        }
    }
}

fn evaluate_size_predicate(candidate: &CandidateRef, expr: &str) -> EvalOutcome {
    let rest = match expr.strip_prefix("size") {
        Some(rest) => rest.trim_start(),
        None => return EvalOutcome::Error(format!("cannot evaluate '{}'", expr)),
    };
    let (greater, bound) = if let Some(bound) = rest.strip_prefix('>') {
        (true, bound)
    } else if let Some(bound) = rest.strip_prefix('<') {
        (false, bound)
    } else {
        return EvalOutcome::Error(format!("cannot evaluate '{}'", expr));
    };
    let bound: u64 = match bound.trim().parse() {
        Ok(v) => v,
        Err(_) => return EvalOutcome::Error(format!("cannot evaluate '{}'", expr)),
    };
    match candidate.size {
        Some(size) => {
            let matched = if greater { size > bound } else { size < bound };
            if matched {
                EvalOutcome::Matched
            } else {
                EvalOutcome::NotMatched
            }
        }
        None => EvalOutcome::Error(format!("no size recorded for instance #{}", candidate.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_class_is_idempotent() {
        let target = MockDebuggee::new();
        let a = target.define_class("java.lang.String");
        let b = target.define_class("java.lang.String");
        assert_eq!(a, b);
        assert_eq!(target.loaded_classes().unwrap().len(), 1);
    }

    #[test]
    fn test_allocate_and_count() {
        let target = MockDebuggee::new();
        let string = target.define_class("java.lang.String");
        let object = target.define_class("java.lang.Object");
        target.allocate(string, 5);
        target.allocate(object, 2);

        let counts = target.count_instances(&[string, object]).unwrap();
        assert_eq!(counts, vec![5, 2]);

        target.free(string, 3);
        let counts = target.count_instances(&[string, object]).unwrap();
        assert_eq!(counts, vec![2, 2]);
    }

    #[test]
    fn test_count_failure_is_consumed() {
        let target = MockDebuggee::new();
        let class = target.define_class("A");
        target.fail_next_count_batches(1);
        assert!(target.count_instances(&[class]).is_err());
        assert!(target.count_instances(&[class]).is_ok());
    }

    #[test]
    fn test_count_failure_after_successes() {
        let target = MockDebuggee::new();
        let class = target.define_class("A");
        target.fail_count_batch_after(1);
        assert!(target.count_instances(&[class]).is_ok());
        assert!(target.count_instances(&[class]).is_err());
        assert!(target.count_instances(&[class]).is_ok());
    }

    #[test]
    fn test_unloaded_class_counts_zero() {
        let target = MockDebuggee::new();
        let a = target.define_class("A");
        let b = target.define_class("B");
        target.allocate(b, 1);
        target.unload_class(b);
        assert_eq!(target.count_instances(&[a, b]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_instances_of_respects_limit() {
        let target = MockDebuggee::new();
        let class = target.define_class("A");
        target.allocate(class, 10);
        assert_eq!(target.instances_of(class, 4).unwrap().len(), 4);
        assert_eq!(target.instances_of(class, 100).unwrap().len(), 10);
    }

    #[test]
    fn test_size_predicate() {
        let target = MockDebuggee::new();
        let class = target.define_class("byte[]");
        let small = target.allocate_sized(class, 16);
        let big = target.allocate_sized(class, 4096);
        let unsized_ref = target.allocate_unsized(class);

        assert_eq!(target.evaluate(&big, "size > 64"), EvalOutcome::Matched);
        assert_eq!(target.evaluate(&small, "size > 64"), EvalOutcome::NotMatched);
        assert_eq!(target.evaluate(&small, "size < 64"), EvalOutcome::Matched);
        assert!(matches!(
            target.evaluate(&unsized_ref, "size > 64"),
            EvalOutcome::Error(_)
        ));
        assert!(matches!(
            target.evaluate(&small, "this.length > 3"),
            EvalOutcome::Error(_)
        ));
    }

    #[test]
    fn test_injected_eval_error() {
        let target = MockDebuggee::new();
        let class = target.define_class("A");
        let candidate = target.allocate_sized(class, 32);
        target.inject_eval_error(candidate.id, "field not readable");
        assert_eq!(
            target.evaluate(&candidate, "true"),
            EvalOutcome::Error("field not readable".to_string())
        );
    }
}
