//! Deferred-side reader of a [`CaptureRing`].
//!
//! # Contract
//!
//! "I report every edge I can. I skip if I fall behind."
//!
//! Never errors. If the worker falls more than a ring's depth behind the
//! edges, the cursor jumps forward and the skipped edges are counted as
//! dropped in [`PipelineStats`]. Each returned capture belongs to exactly the
//! edge index returned with it.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::capture::{CaptureRing, CapturedTimestamp, SlotRead, CAPTURE_DEPTH};
use crate::stats::PipelineStats;

/// Best-effort cursor over one ring.
///
/// Only one deferred invocation per source runs at a time, so the cursor
/// has a single user; the atomics exist so the owning handler can be shared
/// with the platform as `&self`.
pub struct CaptureCursor<const N: usize = CAPTURE_DEPTH> {
    read_idx: AtomicU32,
}

impl<const N: usize> CaptureCursor<N> {
    /// Start at the ring's current head: earlier edges are not reported.
    pub fn new(ring: &CaptureRing<N>) -> Self {
        Self {
            read_idx: AtomicU32::new(ring.head()),
        }
    }

    /// Next unreported capture, with its edge index.
    ///
    /// Returns `None` when caught up (or when the next slot is still being
    /// written; it will be picked up by the next invocation).
    pub fn tick(&self, ring: &CaptureRing<N>, stats: &PipelineStats) -> Option<(u32, CapturedTimestamp)> {
        let mut idx = self.read_idx.load(Ordering::Relaxed);

        if ring.is_overrun(idx) {
            let head = ring.head();
            let resume = head.wrapping_sub((N / 2) as u32);
            stats.record_dropped(resume.wrapping_sub(idx));
            idx = resume;
        }

        loop {
            match ring.read(idx) {
                SlotRead::Ready(ts) => {
                    self.read_idx.store(idx.wrapping_add(1), Ordering::Relaxed);
                    return Some((idx, ts));
                }
                SlotRead::Overwritten => {
                    // lapped between the overrun check and the read
                    stats.record_dropped(1);
                    idx = idx.wrapping_add(1);
                }
                SlotRead::Contended => {
                    stats.record_contended();
                    self.read_idx.store(idx, Ordering::Relaxed);
                    return None;
                }
                SlotRead::Pending => {
                    self.read_idx.store(idx, Ordering::Relaxed);
                    return None;
                }
            }
        }
    }

    /// Iterate over every pending capture.
    pub fn drain<'c>(
        &'c self,
        ring: &'c CaptureRing<N>,
        stats: &'c PipelineStats,
    ) -> DrainIterator<'c, N> {
        DrainIterator { cursor: self, ring, stats }
    }
}

/// Iterator for draining all pending captures.
pub struct DrainIterator<'c, const N: usize> {
    cursor: &'c CaptureCursor<N>,
    ring: &'c CaptureRing<N>,
    stats: &'c PipelineStats,
}

impl<const N: usize> Iterator for DrainIterator<'_, N> {
    type Item = (u32, CapturedTimestamp);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.tick(self.ring, self.stats)
    }
}
