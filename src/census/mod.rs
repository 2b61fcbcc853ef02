//! Live heap census: the snapshot store and the adaptive poller.

mod poller;
mod store;

pub use poller::{AdaptiveCensusPoller, CensusTiming, PollOutcome, next_poll_delay};
pub use store::CensusStore;
