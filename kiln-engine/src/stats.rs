//! Build counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters of a [`BuildCoordinator`](crate::BuildCoordinator).
#[derive(Debug, Default)]
pub struct BuildStats {
    started: AtomicU64,
    joined: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Point-in-time copy of [`BuildStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStatsSnapshot {
    /// Builder invocations.
    pub started: u64,
    /// Callers that attached to a build already in flight.
    pub joined: u64,
    pub succeeded: u64,
    /// Failed builds, timeouts included.
    pub failed: u64,
    pub timed_out: u64,
}

impl BuildStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, timed_out: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> BuildStatsSnapshot {
        BuildStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl BuildStatsSnapshot {
    /// Builds that have finished either way.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = BuildStats::new();
        stats.record_started();
        stats.record_started();
        stats.record_joined();
        stats.record_succeeded();
        stats.record_failed(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.started, 2);
        assert_eq!(snapshot.joined, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.completed(), 2);
    }
}
