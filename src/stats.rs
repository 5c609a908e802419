//! Pipeline health counters.
//!
//! # Philosophy
//!
//! > A missed PPS report is data, not a failure.
//!
//! Once armed, nothing in the edge pipeline returns an error. Whatever goes
//! wrong (lapped slots, contended reads, stale snapshots) is counted here and
//! surfaced in reports and at teardown, while the pipeline keeps running.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Thread-safe counters for one source.
///
/// Written from both contexts; every update is a single relaxed atomic add.
pub struct PipelineStats {
    /// Edges stamped by the immediate handler.
    edges: AtomicU32,
    /// Deferred invocations started.
    deferred_runs: AtomicU32,
    /// Reports carrying the capture of their own edge.
    fresh_reports: AtomicU32,
    /// Reports built from a stale or zero snapshot.
    stale_reports: AtomicU32,
    /// Captures lost because the worker fell behind.
    dropped: AtomicU32,
    /// Reads abandoned because a writer held the slot.
    contended: AtomicU32,
}

impl PipelineStats {
    pub const fn new() -> Self {
        Self {
            edges: AtomicU32::new(0),
            deferred_runs: AtomicU32::new(0),
            fresh_reports: AtomicU32::new(0),
            stale_reports: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            contended: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn record_edge(&self) {
        self.edges.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deferred_run(&self) {
        self.deferred_runs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_report(&self, fresh: bool) {
        if fresh {
            self.fresh_reports.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stale_reports.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_dropped(&self, count: u32) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            edges: self.edges.load(Ordering::Relaxed),
            deferred_runs: self.deferred_runs.load(Ordering::Relaxed),
            fresh_reports: self.fresh_reports.load(Ordering::Relaxed),
            stale_reports: self.stale_reports.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub edges: u32,
    pub deferred_runs: u32,
    pub fresh_reports: u32,
    pub stale_reports: u32,
    pub dropped: u32,
    pub contended: u32,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "edges={} runs={} fresh={} stale={} dropped={} contended={}",
            self.edges,
            self.deferred_runs,
            self.fresh_reports,
            self.stale_reports,
            self.dropped,
            self.contended
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = PipelineStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        stats.record_edge();
        stats.record_edge();
        stats.record_deferred_run();
        stats.record_report(true);
        stats.record_report(false);
        stats.record_dropped(3);

        let snap = stats.snapshot();
        assert_eq!(snap.edges, 2);
        assert_eq!(snap.deferred_runs, 1);
        assert_eq!(snap.fresh_reports, 1);
        assert_eq!(snap.stale_reports, 1);
        assert_eq!(snap.dropped, 3);
        assert_eq!(snap.contended, 0);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = StatsSnapshot { edges: 4, fresh_reports: 4, deferred_runs: 3, ..Default::default() };
        assert_eq!(
            format!("{}", snap),
            "edges=4 runs=3 fresh=4 stale=0 dropped=0 contended=0"
        );
    }
}
