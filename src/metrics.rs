use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing dispatcher activity.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    retries: AtomicU64,
    follow_ups_scheduled: AtomicU64,
}

impl DispatchMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run whose task context was persisted.
    pub fn record_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that failed after exhausting its attempts.
    pub fn record_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a whole-run retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a follow-up event enqueued by a post-processing hook.
    pub fn record_follow_up(&self) {
        self.follow_ups_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            follow_ups_scheduled: self.follow_ups_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of dispatcher counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DispatchSnapshot {
    /// Runs that completed and were persisted.
    pub runs_completed: u64,
    /// Runs that failed for good.
    pub runs_failed: u64,
    /// Whole-run retries performed.
    pub retries: u64,
    /// Follow-up events scheduled by hooks.
    pub follow_ups_scheduled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_runs_and_retries() {
        let metrics = DispatchMetrics::new();
        metrics.record_completed();
        metrics.record_retry();
        metrics.record_retry();
        metrics.record_failed();
        metrics.record_follow_up();

        assert_eq!(
            metrics.snapshot(),
            DispatchSnapshot {
                runs_completed: 1,
                runs_failed: 1,
                retries: 2,
                follow_ups_scheduled: 1,
            }
        );
    }

    #[test]
    fn snapshot_starts_empty() {
        let snapshot = DispatchMetrics::new().snapshot();
        assert_eq!(snapshot.runs_completed, 0);
        assert_eq!(snapshot.follow_ups_scheduled, 0);
    }
}
