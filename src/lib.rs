//! heaplot - live heap census and instance filtering for a debugger target.
//!
//! This library provides the core engine behind a debugger "memory view":
//! - `census` - adaptive, latency-paced polling of per-class instance counts
//! - `filter` - cancellable background filtering of candidate instances
//! - `target` - trait boundary to the introspected process, with mocks
//! - `sched` - serialized command queue for exclusive target access
//! - `view` - filtered/sorted census rows for UI consumption

pub mod census;
pub mod config;
pub mod filter;
pub mod model;
pub mod sched;
pub mod target;
pub mod view;
