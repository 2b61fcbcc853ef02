//! Serialized access to the suspended target process.
//!
//! Every interaction with the target (class enumeration, instance counting,
//! predicate evaluation) runs as a command on one queue, because the target
//! is typically suspended and tolerates exactly one inspector at a time.
//! Census and filter work is enqueued at [`Priority::Lowest`] so interactive
//! debugger operations are never starved behind bulk queries.

mod queue;

pub use queue::SerialCommandQueue;

use std::sync::mpsc;

/// Scheduling priority of a target command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Interactive debugger operations (stepping, breakpoint evaluation).
    Normal,
    /// Bulk background work: census batches, per-candidate evaluation.
    Lowest,
}

/// A unit of work needing exclusive target access.
pub type Command = Box<dyn FnOnce() + Send>;

/// Serializes commands that need exclusive access to the target process.
pub trait CommandScheduler: Send + Sync {
    /// Enqueues a command. Commands of the same priority run in submission
    /// order; `Normal` commands run ahead of queued `Lowest` ones.
    fn schedule(&self, priority: Priority, command: Command);
}

/// Runs `f` on the scheduler and blocks until its result is available.
///
/// Returns `None` when the scheduler shut down before the command ran.
pub fn run_on<R, F>(scheduler: &dyn CommandScheduler, priority: Priority, f: F) -> Option<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    scheduler.schedule(
        priority,
        Box::new(move || {
            let _ = tx.send(f());
        }),
    );
    rx.recv().ok()
}

/// Scheduler that runs every command immediately on the calling thread.
/// Makes scheduling deterministic in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl InlineScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl CommandScheduler for InlineScheduler {
    fn schedule(&self, _priority: Priority, command: Command) {
        command();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_on_inline_returns_result() {
        let scheduler = InlineScheduler::new();
        let result = run_on(&scheduler, Priority::Lowest, || 2 + 2);
        assert_eq!(result, Some(4));
    }
}
