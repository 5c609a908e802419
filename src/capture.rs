//! Lock-free capture ring for edge timestamps.
//!
//! This is where the two interrupt stages meet.
//!
//! # Architecture
//!
//! ```text
//! Edge Capture ──push()──▶ CaptureRing ──read()──▶ Deferred Processor
//! (immediate ctx)          (seqlock slots)         (worker ctx)
//! ```
//!
//! # Rules
//!
//! - Only atomic operations for synchronization
//! - `push()` never blocks and never allocates
//! - A slot overwritten by a later edge is detected by the reader and
//!   counted, never reported as the earlier edge
//!
//! # Slot protocol
//!
//! Every slot is a small sequence lock. The writer moves the slot sequence
//! from even to odd, stores `{index, seconds, nanoseconds}`, then moves it to
//! the next even value with `Release`. A reader accepts the slot only if it
//! saw the same even sequence before and after copying the fields, and the
//! stored index is the one it asked for.
//!
//! 64-bit fields are stored as two `AtomicU32` halves. The sequence already
//! makes the halves consistent, and 32-bit atomics are native on every
//! target, so nothing here can fall back to a lock inside an ISR.

use core::hint::spin_loop;
use core::sync::atomic::{fence, AtomicU32, Ordering};

use crate::device::CaptureLayout;

/// Default ring depth. At 1 Hz PPS this is 8 s of slack for the worker.
pub const CAPTURE_DEPTH: usize = 8;

/// Reader attempts on a slot held by a writer before giving up.
const READ_RETRIES: u32 = 64;

/// Marker for a slot that was never written.
const NEVER_WRITTEN: u32 = u32::MAX;

/// One captured instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapturedTimestamp {
    /// Whole seconds since the epoch (wall clock).
    pub seconds: i64,
    /// Raw nanoseconds as read from the clock, not yet reduced.
    pub nanoseconds: u64,
}

impl CapturedTimestamp {
    pub const ZERO: Self = Self { seconds: 0, nanoseconds: 0 };
}

/// Outcome of reading one edge index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRead {
    /// The capture for the requested edge.
    Ready(CapturedTimestamp),
    /// Not written yet.
    Pending,
    /// A later edge reused the slot before it was read.
    Overwritten,
    /// A writer held the slot for every retry.
    Contended,
}

/// A 64-bit value kept as two 32-bit atomics. Only consistent under the
/// slot sequence.
struct SplitU64 {
    lo: AtomicU32,
    hi: AtomicU32,
}

impl SplitU64 {
    const fn new() -> Self {
        Self { lo: AtomicU32::new(0), hi: AtomicU32::new(0) }
    }

    #[inline]
    fn store(&self, value: u64) {
        self.lo.store(value as u32, Ordering::Relaxed);
        self.hi.store((value >> 32) as u32, Ordering::Relaxed);
    }

    #[inline]
    fn load(&self) -> u64 {
        let lo = self.lo.load(Ordering::Relaxed) as u64;
        let hi = self.hi.load(Ordering::Relaxed) as u64;
        (hi << 32) | lo
    }
}

struct Slot {
    seq: AtomicU32,
    index: AtomicU32,
    seconds: SplitU64,
    nanoseconds: SplitU64,
}

impl Slot {
    const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            index: AtomicU32::new(NEVER_WRITTEN),
            seconds: SplitU64::new(),
            nanoseconds: SplitU64::new(),
        }
    }
}

/// Ring of captured timestamps, one entry per edge.
///
/// Normally one writer (the source's immediate handler). Several writers are
/// tolerated for a capture shared between sources: each claims a distinct
/// index and takes the slot sequence with a short CAS spin that can only
/// wait on another writer's O(1) store sequence.
pub struct CaptureRing<const N: usize = CAPTURE_DEPTH> {
    slots: [Slot; N],
    /// Next edge index to hand out (monotonically increasing, wraps).
    claim_idx: AtomicU32,
}

impl<const N: usize> CaptureRing<N> {
    const MASK: usize = N - 1;

    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Panics at compile time if N is not a power of 2.
    pub const fn new() -> Self {
        const { assert!(N.is_power_of_two(), "Capture ring size must be power of 2") };

        Self {
            slots: [const { Slot::new() }; N],
            claim_idx: AtomicU32::new(0),
        }
    }

    /// Store a capture and return its edge index.
    ///
    /// # Timing
    ///
    /// O(1), no blocking, no allocation. Safe from the immediate context.
    #[inline]
    pub fn push(&self, ts: CapturedTimestamp) -> u32 {
        let idx = self.claim_idx.fetch_add(1, Ordering::AcqRel);
        let slot = &self.slots[(idx as usize) & Self::MASK];

        let mut seq = slot.seq.load(Ordering::Relaxed);
        loop {
            if seq & 1 == 1 {
                // another writer is mid-store on this slot
                spin_loop();
                seq = slot.seq.load(Ordering::Relaxed);
                continue;
            }
            match slot.seq.compare_exchange_weak(
                seq,
                seq.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => seq = current,
            }
        }
        fence(Ordering::Release);

        slot.index.store(idx, Ordering::Relaxed);
        slot.seconds.store(ts.seconds as u64);
        slot.nanoseconds.store(ts.nanoseconds);

        slot.seq.store(seq.wrapping_add(2), Ordering::Release);
        idx
    }

    /// Read the capture of edge `idx`.
    ///
    /// # Timing
    ///
    /// Bounded: at most `READ_RETRIES` attempts on a slot being written.
    pub fn read(&self, idx: u32) -> SlotRead {
        let behind = self.head().wrapping_sub(idx);
        if behind == 0 || behind > u32::MAX / 2 {
            return SlotRead::Pending;
        }
        if behind > N as u32 {
            return SlotRead::Overwritten;
        }

        let slot = &self.slots[(idx as usize) & Self::MASK];
        for _ in 0..READ_RETRIES {
            let s1 = slot.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                spin_loop();
                continue;
            }

            let index = slot.index.load(Ordering::Relaxed);
            let seconds = slot.seconds.load() as i64;
            let nanoseconds = slot.nanoseconds.load();

            fence(Ordering::Acquire);
            if slot.seq.load(Ordering::Relaxed) != s1 {
                continue;
            }

            if index == idx {
                return SlotRead::Ready(CapturedTimestamp { seconds, nanoseconds });
            }
            if index != NEVER_WRITTEN && (index.wrapping_sub(idx) as i32) > 0 {
                return SlotRead::Overwritten;
            }
            return SlotRead::Pending;
        }
        SlotRead::Contended
    }

    /// Most recent complete capture, with its edge index.
    ///
    /// Used where the newest value matters and per-edge history does not
    /// (pre-consumed sources, captures shared between sources).
    pub fn latest(&self) -> Option<(u32, CapturedTimestamp)> {
        let head = self.head();
        for back in 1..=N as u32 {
            if back > head {
                break;
            }
            let idx = head.wrapping_sub(back);
            if let SlotRead::Ready(ts) = self.read(idx) {
                return Some((idx, ts));
            }
        }
        None
    }

    /// Number of edge indices handed out so far (wraps).
    #[inline]
    pub fn head(&self) -> u32 {
        self.claim_idx.load(Ordering::Acquire)
    }

    /// How many edges `reader_idx` is behind.
    #[inline]
    pub fn lag(&self, reader_idx: u32) -> u32 {
        self.head().wrapping_sub(reader_idx)
    }

    /// True if `reader_idx` has already been reused.
    #[inline]
    pub fn is_overrun(&self, reader_idx: u32) -> bool {
        self.lag(reader_idx) > N as u32
    }
}

/// A ring written by several sources.
///
/// Readers decode with their own kind's layout, so every source bound to one
/// shared capture must capture the same way. Arming a source whose kind
/// captures differently is rejected.
pub struct SharedCapture {
    layout: CaptureLayout,
    ring: CaptureRing,
}

impl SharedCapture {
    pub const fn new(layout: CaptureLayout) -> Self {
        Self { layout, ring: CaptureRing::new() }
    }

    #[inline]
    pub fn layout(&self) -> CaptureLayout {
        self.layout
    }

    #[inline]
    pub fn ring(&self) -> &CaptureRing {
        &self.ring
    }
}

impl<const N: usize> Default for CaptureRing<N> {
    fn default() -> Self {
        Self::new()
    }
}
