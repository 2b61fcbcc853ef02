//! The filter-run aggregator: counters, chunking, throttled progress.

use std::sync::Arc;
use std::time::Instant;

use crate::config::FilterConfig;
use crate::model::{CandidateRef, CompletionReason, FilterRun};

use super::{Action, EvalError, EventSink, FilterEvent, FilterListener};

/// Folds the per-candidate callback stream of one run into chunked UI
/// events.
///
/// Matched candidates accumulate in a chunk buffer flushed when it reaches
/// `chunk_size` or has been sitting for `max_flush_interval`. Evaluation
/// errors go to a separate group delivered after all matched chunks.
/// Progress updates are throttled by wall-clock time so a fast candidate
/// stream cannot flood the UI.
pub struct FilterRunAggregator {
    run: Arc<FilterRun>,
    sink: Arc<dyn EventSink>,
    config: FilterConfig,
    total: usize,
    proceed: usize,
    matched: usize,
    errored: usize,
    chunk: Vec<CandidateRef>,
    errors: Vec<EvalError>,
    last_flush: Option<Instant>,
    last_progress: Option<Instant>,
}

impl FilterRunAggregator {
    pub fn new(run: Arc<FilterRun>, sink: Arc<dyn EventSink>, config: FilterConfig) -> Self {
        Self {
            run,
            sink,
            config,
            total: 0,
            proceed: 0,
            matched: 0,
            errored: 0,
            chunk: Vec::new(),
            errors: Vec::new(),
            last_flush: None,
            last_progress: None,
        }
    }

    /// Candidates evaluated so far (matched + not matched + errored).
    pub fn proceed_count(&self) -> usize {
        self.proceed
    }

    pub fn matched_count(&self) -> usize {
        self.matched
    }

    pub fn error_count(&self) -> usize {
        self.errored
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    fn flush_chunk(&mut self) {
        if self.chunk.is_empty() {
            return;
        }
        let candidates = std::mem::take(&mut self.chunk);
        self.sink.post(FilterEvent::MatchChunk {
            run: self.run.id(),
            candidates,
        });
        self.last_flush = Some(Instant::now());
    }

    fn chunk_is_stale(&self) -> bool {
        self.last_flush
            .is_some_and(|at| at.elapsed() >= self.config.max_flush_interval)
    }

    fn progress_text(&self) -> String {
        format!("Matched {} of {}", self.matched, self.total)
    }

    fn update_progress(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_progress {
            if now.duration_since(last) < self.config.progress_interval {
                return;
            }
        }
        self.last_progress = Some(now);
        let fraction = if self.total > 0 {
            self.proceed as f64 / self.total as f64
        } else {
            1.0
        };
        self.sink.post(FilterEvent::Progress {
            run: self.run.id(),
            fraction,
            text: self.progress_text(),
        });
    }

    fn completion_text(&self, reason: CompletionReason, errors: usize) -> String {
        if errors > 0 {
            format!(
                "{} ({}, {} errors)",
                self.progress_text(),
                reason,
                errors
            )
        } else {
            format!("{} ({})", self.progress_text(), reason)
        }
    }
}

impl FilterListener for FilterRunAggregator {
    fn started(&mut self, total: usize) {
        self.total = total;
        self.proceed = 0;
        self.matched = 0;
        self.errored = 0;
        self.chunk.clear();
        self.errors.clear();
        self.last_flush = Some(Instant::now());
        self.last_progress = None;
        self.sink.post(FilterEvent::Started {
            run: self.run.id(),
            total,
        });
    }

    fn matched(&mut self, candidate: CandidateRef) -> Action {
        self.proceed += 1;
        self.matched += 1;
        self.chunk.push(candidate);
        self.update_progress();
        if self.chunk.len() >= self.config.chunk_size || self.chunk_is_stale() {
            self.flush_chunk();
        }
        if self.matched >= self.config.node_cap {
            Action::Stop
        } else {
            Action::Continue
        }
    }

    fn not_matched(&mut self, _candidate: CandidateRef) -> Action {
        self.proceed += 1;
        self.update_progress();
        Action::Continue
    }

    fn error(&mut self, candidate: CandidateRef, description: &str) -> Action {
        self.proceed += 1;
        self.errored += 1;
        self.errors.push(EvalError {
            description: description.to_string(),
            candidate,
        });
        self.update_progress();
        Action::Continue
    }

    fn completed(&mut self, reason: CompletionReason) {
        // Remaining matches first, then the trailing error group.
        self.flush_chunk();
        let errors = std::mem::take(&mut self.errors);
        let error_count = errors.len();
        if !errors.is_empty() {
            self.sink.post(FilterEvent::ErrorGroup {
                run: self.run.id(),
                errors,
            });
        }
        self.run.complete(reason);
        self.sink.post(FilterEvent::Completed {
            run: self.run.id(),
            reason,
            matched: self.matched,
            errors: error_count,
            text: self.completion_text(reason, error_count),
        });
    }
}
