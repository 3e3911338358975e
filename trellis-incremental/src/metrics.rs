//! Evaluation metrics
//!
//! [`EvaluationMetrics`] is a [`ProgressReceiver`] that counts what the
//! evaluator did: how many nodes were invalidated, scheduled, rebuilt or
//! verified clean.

use crate::events::{EvaluationState, NodeState, ProgressReceiver};
use crate::node::DirtyKind;
use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_types::Key;

/// Counters fed by evaluator progress
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    /// Nodes marked changed by `invalidate` or `inject`
    pub changed_count: AtomicU64,

    /// Nodes dirtied because a dependency might have changed
    pub dirtied_count: AtomicU64,

    /// Keys added to the work queue
    pub enqueued_count: AtomicU64,

    /// Node function invocations, restarts included
    pub compute_count: AtomicU64,

    /// Nodes committed after running their function
    pub built_count: AtomicU64,

    /// Dirty nodes that kept their value without running their function
    pub clean_count: AtomicU64,

    /// Nodes committed with an error
    pub error_count: AtomicU64,
}

impl EvaluationMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            changed: self.changed_count.load(Ordering::Relaxed),
            dirtied: self.dirtied_count.load(Ordering::Relaxed),
            enqueued: self.enqueued_count.load(Ordering::Relaxed),
            computes: self.compute_count.load(Ordering::Relaxed),
            built: self.built_count.load(Ordering::Relaxed),
            clean: self.clean_count.load(Ordering::Relaxed),
            errors: self.error_count.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicU64; 7] {
        [
            &self.changed_count,
            &self.dirtied_count,
            &self.enqueued_count,
            &self.compute_count,
            &self.built_count,
            &self.clean_count,
            &self.error_count,
        ]
    }
}

impl ProgressReceiver for EvaluationMetrics {
    fn invalidated(&self, _key: &Key, kind: DirtyKind) {
        let counter = match kind {
            DirtyKind::Changed => &self.changed_count,
            DirtyKind::Dirty => &self.dirtied_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn enqueueing(&self, _key: &Key) {
        self.enqueued_count.fetch_add(1, Ordering::Relaxed);
    }

    fn state_starting(&self, _key: &Key, state: NodeState) {
        if state == NodeState::Compute {
            self.compute_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn evaluated(&self, _key: &Key, value: Option<&Value>, state: EvaluationState) {
        match state {
            EvaluationState::Built => self.built_count.fetch_add(1, Ordering::Relaxed),
            EvaluationState::Clean => self.clean_count.fetch_add(1, Ordering::Relaxed),
        };
        if value.is_none() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A point-in-time snapshot of evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Nodes invalidated or injected
    pub changed: u64,
    /// Nodes marked dirty
    pub dirtied: u64,
    /// Nodes scheduled for evaluation
    pub enqueued: u64,
    /// Function invocations
    pub computes: u64,
    /// Nodes committed with a new value or error
    pub built: u64,
    /// Dirty nodes verified clean
    pub clean: u64,
    /// Nodes committed with an error
    pub errors: u64,
}

impl MetricsSnapshot {
    /// Share of finished nodes that were verified clean (0.0 to 1.0)
    pub fn clean_rate(&self) -> f64 {
        let total = self.built + self.clean;
        if total == 0 {
            0.0
        } else {
            self.clean as f64 / total as f64
        }
    }

    /// Average function invocations per built node; above 1.0 means restarts
    pub fn computes_per_build(&self) -> f64 {
        if self.built == 0 {
            0.0
        } else {
            self.computes as f64 / self.built as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  Changed: {} | Dirtied: {} | Enqueued: {}",
            self.changed, self.dirtied, self.enqueued
        )?;
        writeln!(
            f,
            "  Built: {} | Clean: {} | Clean Rate: {:.1}%",
            self.built,
            self.clean,
            self.clean_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Computes: {} | Per Build: {:.2} | Errors: {}",
            self.computes,
            self.computes_per_build(),
            self.errors
        )?;
        Ok(())
    }
}
