use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::case::CaseStatus;
use crate::domain::decision::{Decision, Effect};

/// Counter registry for the engine and orchestrator.
///
/// Plain relaxed atomics; scraped by the embedding service and asserted on
/// in tests via `snapshot`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Total decision requests processed
    pub decisions_total: AtomicU64,
    pub decisions_permit: AtomicU64,
    pub decisions_deny: AtomicU64,

    /// Decisions served from cache
    pub cache_hits: AtomicU64,

    /// Evaluations that failed closed on a malformed condition
    pub evaluation_errors: AtomicU64,

    /// Attribute resolutions that fell back to absent
    pub resolution_warnings: AtomicU64,

    /// Rights cases by terminal outcome
    pub cases_opened: AtomicU64,
    pub cases_completed: AtomicU64,
    pub cases_partially_failed: AtomicU64,
    pub cases_denied: AtomicU64,

    /// Subtask retry attempts beyond the first
    pub subtask_retries: AtomicU64,
    pub subtask_failures: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub decisions_total: u64,
    pub decisions_permit: u64,
    pub decisions_deny: u64,
    pub cache_hits: u64,
    pub evaluation_errors: u64,
    pub resolution_warnings: u64,
    pub cases_opened: u64,
    pub cases_completed: u64,
    pub cases_partially_failed: u64,
    pub cases_denied: u64,
    pub subtask_retries: u64,
    pub subtask_failures: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    pub fn record_decision(&self, decision: &Decision, cache_hit: bool) {
        self.decisions_total.fetch_add(1, Ordering::Relaxed);
        match decision.effect {
            Effect::Permit => self.decisions_permit.fetch_add(1, Ordering::Relaxed),
            Effect::Deny => self.decisions_deny.fetch_add(1, Ordering::Relaxed),
        };
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            // Warnings on a cached decision were counted when it was computed
            self.resolution_warnings
                .fetch_add(decision.warnings.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn record_evaluation_error(&self) {
        self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_case_opened(&self) {
        self.cases_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_case_closed(&self, status: CaseStatus) {
        match status {
            CaseStatus::Completed => self.cases_completed.fetch_add(1, Ordering::Relaxed),
            CaseStatus::PartiallyFailed => {
                self.cases_partially_failed.fetch_add(1, Ordering::Relaxed)
            }
            CaseStatus::Denied => self.cases_denied.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_subtask_retry(&self) {
        self.subtask_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subtask_failure(&self) {
        self.subtask_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decisions_total: self.decisions_total.load(Ordering::Relaxed),
            decisions_permit: self.decisions_permit.load(Ordering::Relaxed),
            decisions_deny: self.decisions_deny.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            evaluation_errors: self.evaluation_errors.load(Ordering::Relaxed),
            resolution_warnings: self.resolution_warnings.load(Ordering::Relaxed),
            cases_opened: self.cases_opened.load(Ordering::Relaxed),
            cases_completed: self.cases_completed.load(Ordering::Relaxed),
            cases_partially_failed: self.cases_partially_failed.load(Ordering::Relaxed),
            cases_denied: self.cases_denied.load(Ordering::Relaxed),
            subtask_retries: self.subtask_retries.load(Ordering::Relaxed),
            subtask_failures: self.subtask_failures.load(Ordering::Relaxed),
        }
    }
}
