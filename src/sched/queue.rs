//! Worker-thread command queue with two priority lanes.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::{Command, CommandScheduler, Priority};

struct QueueState {
    normal: VecDeque<Command>,
    lowest: VecDeque<Command>,
    shutdown: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// A command queue backed by one worker thread.
///
/// Commands run strictly one at a time: queued `Normal` commands always run
/// before queued `Lowest` ones, and same-priority commands run in submission
/// order. Shutdown is cooperative: the command in flight finishes, pending
/// commands are dropped.
pub struct SerialCommandQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialCommandQueue {
    /// Starts the worker thread.
    pub fn new() -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                normal: VecDeque::new(),
                lowest: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::spawn(move || {
            loop {
                let command = {
                    let mut state = worker_shared.state.lock().unwrap();
                    loop {
                        if let Some(command) = state.normal.pop_front() {
                            break command;
                        }
                        if let Some(command) = state.lowest.pop_front() {
                            break command;
                        }
                        if state.shutdown {
                            return;
                        }
                        state = worker_shared.available.wait(state).unwrap();
                    }
                };
                command();
            }
        });

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the worker after the in-flight command, dropping pending ones.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            let pending = state.normal.len() + state.lowest.len();
            state.normal.clear();
            state.lowest.clear();
            pending
        };
        if pending > 0 {
            debug!("command queue shutdown dropped {} pending commands", pending);
        }
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

impl Default for SerialCommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandScheduler for SerialCommandQueue {
    fn schedule(&self, priority: Priority, command: Command) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                debug!("command dropped: queue is shut down");
                return;
            }
            match priority {
                Priority::Normal => state.normal.push_back(command),
                Priority::Lowest => state.lowest.push_back(command),
            }
        }
        self.shared.available.notify_one();
    }
}

impl Drop for SerialCommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
