//! The adaptive census poller.
//!
//! Triggered externally (a timer or session event), never self-scheduling.
//! Each poll enumerates the loaded classes, counts instances in
//! platform-sized batches, measures batch latency and derives the delay the
//! external timer should wait before the next trigger: slow targets get
//! polled less often instead of timing out.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::CensusConfig;
use crate::model::{CensusSnapshot, ClassToken};
use crate::target::{CandidateEnumerator, InstanceCountProvider, TargetError};

use super::CensusStore;

/// Timing of the last completed poll, kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CensusTiming {
    /// Total poll duration.
    pub total: Duration,
    /// Time spent enumerating loaded classes.
    pub enumerate: Duration,
    /// Time spent across all count batches.
    pub counting: Duration,
    /// Number of count batches issued.
    pub batches: usize,
    /// Latency of the final count batch (feeds the pacing formula).
    pub last_batch: Duration,
}

/// What one poll produced.
#[derive(Debug)]
pub enum PollOutcome {
    /// A full counted census was merged and published.
    Counted(Arc<CensusSnapshot>),
    /// The target cannot report counts; a names-only listing was published.
    NamesOnly(Arc<CensusSnapshot>),
}

impl PollOutcome {
    pub fn snapshot(&self) -> &Arc<CensusSnapshot> {
        match self {
            PollOutcome::Counted(snapshot) | PollOutcome::NamesOnly(snapshot) => snapshot,
        }
    }
}

/// Computes the delay before the next poll from the last observed batch
/// latency: `min(latency_coefficient * latency, max_delay)`.
pub fn next_poll_delay(last_batch_latency: Duration, config: &CensusConfig) -> Duration {
    let latency_ms = u64::try_from(last_batch_latency.as_millis()).unwrap_or(u64::MAX);
    let scaled = latency_ms.saturating_mul(u64::from(config.latency_coefficient));
    Duration::from_millis(scaled).min(config.max_delay)
}

/// Counts live instances per loaded class and merges the result into the
/// census store.
pub struct AdaptiveCensusPoller<T>
where
    T: CandidateEnumerator + InstanceCountProvider,
{
    target: Arc<T>,
    store: Arc<CensusStore>,
    config: CensusConfig,
    suggested_delay: Mutex<Duration>,
    last_timing: Mutex<Option<CensusTiming>>,
}

impl<T> AdaptiveCensusPoller<T>
where
    T: CandidateEnumerator + InstanceCountProvider,
{
    pub fn new(target: Arc<T>, store: Arc<CensusStore>, config: CensusConfig) -> Self {
        Self {
            target,
            store,
            config,
            suggested_delay: Mutex::new(Duration::ZERO),
            last_timing: Mutex::new(None),
        }
    }

    /// The census store this poller publishes into.
    pub fn store(&self) -> &Arc<CensusStore> {
        &self.store
    }

    /// Delay the external timer should wait before the next trigger.
    /// Zero until a counted poll has completed.
    pub fn suggested_delay(&self) -> Duration {
        *self.suggested_delay.lock().unwrap()
    }

    /// Timing of the last completed poll.
    pub fn last_timing(&self) -> Option<CensusTiming> {
        self.last_timing.lock().unwrap().clone()
    }

    /// Runs one census pass.
    ///
    /// A count failure in any batch aborts the whole poll: nothing is merged
    /// or published, the store keeps its previous snapshot, and the caller is
    /// expected to retry on the next trigger.
    pub fn poll(&self) -> Result<PollOutcome, TargetError> {
        let poll_started = Instant::now();

        let enumerate_started = Instant::now();
        let classes = self.target.loaded_classes()?;
        let enumerate = enumerate_started.elapsed();

        if !self.target.supports_instance_counts() {
            warn!(
                classes = classes.len(),
                "target cannot report instance counts; publishing names-only census"
            );
            let snapshot = self.store.publish_names_only(classes);
            *self.last_timing.lock().unwrap() = Some(CensusTiming {
                total: poll_started.elapsed(),
                enumerate,
                ..CensusTiming::default()
            });
            return Ok(PollOutcome::NamesOnly(snapshot));
        }

        let mut counted = Vec::with_capacity(classes.len());
        let mut last_batch = Duration::ZERO;
        let mut batches = 0usize;
        let counting_started = Instant::now();
        for batch in classes.chunks(self.config.batch_size.max(1)) {
            let tokens: Vec<ClassToken> = batch.iter().map(|c| c.token).collect();
            let batch_started = Instant::now();
            let counts = self.target.count_instances(&tokens)?;
            last_batch = batch_started.elapsed();
            batches += 1;
            if counts.len() != batch.len() {
                return Err(TargetError::Protocol(format!(
                    "count batch returned {} entries for {} classes",
                    counts.len(),
                    batch.len()
                )));
            }
            counted.extend(batch.iter().cloned().zip(counts));
        }
        let counting = counting_started.elapsed();

        let delay = next_poll_delay(last_batch, &self.config);
        *self.suggested_delay.lock().unwrap() = delay;

        let was_initialized = self.store.is_initialized();
        let snapshot = self.store.merge(counted, was_initialized);
        self.store.mark_initialized();

        *self.last_timing.lock().unwrap() = Some(CensusTiming {
            total: poll_started.elapsed(),
            enumerate,
            counting,
            batches,
            last_batch,
        });
        debug!(
            classes = snapshot.len(),
            batches,
            last_batch_ms = last_batch.as_millis() as u64,
            next_delay_ms = delay.as_millis() as u64,
            "census poll complete"
        );

        Ok(PollOutcome::Counted(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetPlatform;
    use crate::model::CensusEntry;
    use crate::target::mock::MockDebuggee;

    fn poller_with_batch_size(
        target: Arc<MockDebuggee>,
        batch_size: usize,
    ) -> AdaptiveCensusPoller<MockDebuggee> {
        let config = CensusConfig {
            batch_size,
            ..CensusConfig::default()
        };
        AdaptiveCensusPoller::new(target, Arc::new(CensusStore::new()), config)
    }

    #[test]
    fn test_poll_publishes_counted_census() {
        let target = Arc::new(MockDebuggee::typical_heap());
        let poller = poller_with_batch_size(target.clone(), 4096);

        let outcome = poller.poll().unwrap();
        let snapshot = match outcome {
            PollOutcome::Counted(snapshot) => snapshot,
            PollOutcome::NamesOnly(_) => panic!("expected counted census"),
        };

        let string = target.define_class("java.lang.String");
        assert_eq!(snapshot.entry(string).current(), Some(120));
        assert_eq!(snapshot.entry(string).diff(), 0);
        assert!(poller.store().is_initialized());
    }

    #[test]
    fn test_batching_covers_every_class_once() {
        // 6 classes in batches of 2 -> 3 batches, result identical to one big
        // batch.
        let target = Arc::new(MockDebuggee::typical_heap());
        let batched = poller_with_batch_size(target.clone(), 2);
        let whole = poller_with_batch_size(target.clone(), 4096);

        let small = batched.poll().unwrap();
        let big = whole.poll().unwrap();

        assert_eq!(batched.last_timing().unwrap().batches, 3);
        let small = small.snapshot();
        let big = big.snapshot();
        assert_eq!(small.len(), big.len());
        for class in small.classes() {
            assert_eq!(small.entry(class.token), big.entry(class.token));
        }
    }

    #[test]
    fn test_batch_count_matches_ceil_division() {
        let target = Arc::new(MockDebuggee::new());
        for i in 0..7 {
            target.define_class(&format!("C{}", i));
        }
        let poller = poller_with_batch_size(target, 3);
        poller.poll().unwrap();
        // ceil(7 / 3) == 3
        assert_eq!(poller.last_timing().unwrap().batches, 3);
    }

    #[test]
    fn test_count_failure_aborts_poll_without_publishing() {
        let target = Arc::new(MockDebuggee::typical_heap());
        let poller = poller_with_batch_size(target.clone(), 2);

        target.fail_next_count_batches(1);
        assert!(poller.poll().is_err());
        assert!(poller.store().snapshot().is_empty());
        assert!(!poller.store().is_initialized());

        // Next trigger retries and succeeds; first successful census is the
        // baseline.
        let outcome = poller.poll().unwrap();
        assert!(!outcome.snapshot().is_empty());
        let string = target.define_class("java.lang.String");
        assert_eq!(outcome.snapshot().entry(string).diff(), 0);
    }

    #[test]
    fn test_mid_poll_failure_keeps_previous_snapshot() {
        let target = Arc::new(MockDebuggee::typical_heap());
        let poller = poller_with_batch_size(target.clone(), 2);
        poller.poll().unwrap();
        let before = poller.store().snapshot();

        let string = target.define_class("java.lang.String");
        target.allocate(string, 10);
        // First batch of the second poll succeeds, the second one fails.
        target.fail_count_batch_after(1);
        assert!(poller.poll().is_err());

        // No partial merge: the published snapshot is still the prior one.
        let after = poller.store().snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.entry(string).current(), Some(120));
    }

    #[test]
    fn test_names_only_degradation() {
        let target = Arc::new(MockDebuggee::without_count_support());
        let poller = poller_with_batch_size(target.clone(), 4096);

        let outcome = poller.poll().unwrap();
        let snapshot = match outcome {
            PollOutcome::NamesOnly(snapshot) => snapshot,
            PollOutcome::Counted(_) => panic!("expected names-only census"),
        };
        assert!(!snapshot.is_empty());
        let string = target.define_class("java.lang.String");
        assert_eq!(snapshot.entry(string), CensusEntry::Unknown);
        assert!(!poller.store().is_initialized());
        assert_eq!(poller.suggested_delay(), Duration::ZERO);
    }

    #[test]
    fn test_next_poll_delay_monotone_and_capped() {
        let config = CensusConfig::for_platform(TargetPlatform::Standard);
        let mut previous = Duration::ZERO;
        for latency_ms in [0u64, 1, 5, 17, 100, 500, 1_000, 10_000, 100_000] {
            let delay = next_poll_delay(Duration::from_millis(latency_ms), &config);
            assert!(delay >= previous, "delay must not decrease with latency");
            assert!(delay <= config.max_delay);
            previous = delay;
        }
        assert_eq!(
            next_poll_delay(Duration::from_millis(50), &config),
            Duration::from_millis(500)
        );
        assert_eq!(
            next_poll_delay(Duration::from_secs(60), &config),
            config.max_delay
        );
    }

    #[test]
    fn test_suggested_delay_reflects_observed_latency() {
        let target = Arc::new(MockDebuggee::typical_heap());
        target.set_count_latency(Duration::from_millis(20));
        let poller = poller_with_batch_size(target, 4096);

        poller.poll().unwrap();
        let delay = poller.suggested_delay();
        // 20ms batch latency * coefficient 10 => at least 200ms suggested.
        assert!(delay >= Duration::from_millis(200));
        assert!(delay <= CensusConfig::MAX_DELAY);
    }
}
