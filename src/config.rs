//! Platform-tunable constants for census polling and filter runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Characteristics of the target platform the debugger is attached to.
///
/// Resource-constrained targets (embedded VMs, device emulators) get smaller
/// count batches so a single query never holds the suspended process long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetPlatform {
    #[default]
    Standard,
    Constrained,
}

/// Tunables for the adaptive census poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusConfig {
    /// Number of classes per instance-count query.
    pub batch_size: usize,
    /// Multiplier applied to the last observed batch latency when computing
    /// the next poll delay: slower targets get polled less often.
    pub latency_coefficient: u32,
    /// Upper bound on the computed poll delay.
    pub max_delay: Duration,
}

impl CensusConfig {
    /// Default batch size for standard targets.
    pub const STANDARD_BATCH_SIZE: usize = 4096;
    /// Batch size for resource-constrained targets.
    pub const CONSTRAINED_BATCH_SIZE: usize = 256;
    /// Default latency multiplier.
    pub const LATENCY_COEFFICIENT: u32 = 10;
    /// Default poll delay cap.
    pub const MAX_DELAY: Duration = Duration::from_secs(10);

    pub fn for_platform(platform: TargetPlatform) -> Self {
        let batch_size = match platform {
            TargetPlatform::Standard => Self::STANDARD_BATCH_SIZE,
            TargetPlatform::Constrained => Self::CONSTRAINED_BATCH_SIZE,
        };
        Self {
            batch_size,
            latency_coefficient: Self::LATENCY_COEFFICIENT,
            max_delay: Self::MAX_DELAY,
        }
    }
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self::for_platform(TargetPlatform::Standard)
    }
}

/// Tunables for filter runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Matched results per chunk handed to the UI.
    pub chunk_size: usize,
    /// A partially filled chunk is flushed once it has been sitting at least
    /// this long, so slow streams still surface results promptly.
    pub max_flush_interval: Duration,
    /// Maximum matched results a run collects before stopping early.
    pub node_cap: usize,
    /// Minimum wall-clock time between progress updates, independent of
    /// candidate throughput.
    pub progress_interval: Duration,
    /// Maximum candidates enumerated for one run.
    pub candidate_limit: usize,
}

impl FilterConfig {
    pub const CHUNK_SIZE: usize = 50;
    pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
    pub const NODE_CAP: usize = 2000;
    /// ~60 updates per second.
    pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(17);
    pub const CANDIDATE_LIMIT: usize = 100_000;
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::CHUNK_SIZE,
            max_flush_interval: Self::MAX_FLUSH_INTERVAL,
            node_cap: Self::NODE_CAP,
            progress_interval: Self::PROGRESS_INTERVAL,
            candidate_limit: Self::CANDIDATE_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrained_batches_are_smaller() {
        let standard = CensusConfig::for_platform(TargetPlatform::Standard);
        let constrained = CensusConfig::for_platform(TargetPlatform::Constrained);
        assert!(constrained.batch_size < standard.batch_size);
        assert_eq!(standard.latency_coefficient, constrained.latency_coefficient);
    }

    #[test]
    fn test_filter_defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.chunk_size, 50);
        assert!(config.node_cap > config.chunk_size);
        assert!(config.progress_interval < config.max_flush_interval);
    }
}
