//! Progress reporting and cancellation for long-running jobs.
//!
//! The surrounding application owns the sink; the engine only calls it.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{EngineError, Result};

/// Which phase of a bulk job is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Translating,
    Clustering,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Embedding => "embedding",
            Stage::Translating => "translating",
            Stage::Clustering => "clustering",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub done: usize,
    pub total: usize,
}

/// Receiver for progress updates. Must tolerate calls from worker threads.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: ProgressUpdate);
}

/// Sink that drops every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _update: ProgressUpdate) {}
}

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a bulk operation needs to talk back to its caller.
#[derive(Clone, Copy)]
pub struct Job<'a> {
    pub sink: &'a dyn ProgressSink,
    pub cancel: &'a CancelFlag,
    /// Report every `interval` processed items.
    pub interval: usize,
}

impl<'a> Job<'a> {
    pub fn new(sink: &'a dyn ProgressSink, cancel: &'a CancelFlag, interval: usize) -> Self {
        Self {
            sink,
            cancel,
            interval: interval.max(1),
        }
    }

    /// Start a counter for one stage of `total` items.
    pub fn reporter(&self, stage: Stage, total: usize) -> Reporter<'a> {
        Reporter {
            sink: self.sink,
            stage,
            total,
            interval: self.interval,
            done: AtomicUsize::new(0),
        }
    }
}

/// Counts processed items and forwards every `interval`-th one to the sink.
pub struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    stage: Stage,
    total: usize,
    interval: usize,
    done: AtomicUsize,
}

impl Reporter<'_> {
    /// Record `n` more processed items.
    pub fn advance(&self, n: usize) {
        if n == 0 {
            return;
        }
        let before = self.done.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        if after / self.interval != before / self.interval || after == self.total {
            self.emit(after);
        }
    }

    /// Emit the final count regardless of the interval.
    pub fn finish(&self) {
        let done = self.done.load(Ordering::Relaxed);
        if done % self.interval != 0 && done != self.total {
            self.emit(done);
        }
    }

    #[must_use]
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    fn emit(&self, done: usize) {
        self.sink.on_progress(ProgressUpdate {
            stage: self.stage,
            done: done.min(self.total),
            total: self.total,
        });
    }
}
