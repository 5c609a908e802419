//! Interrupt plumbing shared by the core and the platform backends.
//!
//! The shape follows a threaded interrupt: a hard handler running in the
//! immediate context and a threaded handler running on a worker that may
//! block. Which of the two the platform calls is decided once, at arm time,
//! by the [`Pipeline`] variant handed to [`IrqController::request_threaded_irq`].
//!
//! ```text
//!   edge ──▶ Handler::handle()  ──WakeThread──▶ ThreadedHandler::handle_threaded()
//!            (Direct only)                        (worker, may block)
//!
//!   edge ─────────────────────────────────────▶ ThreadedHandler::handle_threaded()
//!            (PreConsumed: no fast path)
//! ```

use alloc::sync::Arc;
use core::fmt;
use core::ops::BitOr;

use crate::error::HalError;

/// Platform interrupt identifier, resolved from a GPIO line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrqNumber(pub u32);

impl fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value returned by a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not for this source (or the source is shutting down).
    None,
    /// Fully handled; nothing to defer.
    Handled,
    /// Handled in the immediate context, deferred work requested.
    WakeThread,
}

/// Trigger and behaviour flags for a registration.
///
/// Combine with `|`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    /// Fire when the line goes low to high.
    pub const TRIGGER_RISING: Flags = Flags(0x0000_0001);
    /// Fire when the line goes high to low.
    pub const TRIGGER_FALLING: Flags = Flags(0x0000_0002);
    /// Keep the line masked until the threaded handler has run.
    pub const ONESHOT: Flags = Flags(0x0000_2000);

    /// No flags.
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit in `other` is set in `self`.
    pub const fn contains(self, other: Flags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Trigger flag for an edge-polarity selector.
    pub const fn trigger(assert_falling_edge: bool) -> Self {
        if assert_falling_edge {
            Flags::TRIGGER_FALLING
        } else {
            Flags::TRIGGER_RISING
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Immediate-context callback.
///
/// Runs with other sources masked on the local core. Must not block, must
/// not allocate, must complete in bounded time.
pub trait Handler: Send + Sync {
    fn handle(&self) -> IrqReturn;
}

/// Deferred-context callback. May block, sleep or be preempted.
pub trait ThreadedHandler: Send + Sync {
    fn handle_threaded(&self) -> IrqReturn;
}

/// The pipeline shape handed to the platform, fixed at arm time.
#[derive(Clone)]
pub enum Pipeline {
    /// Immediate handler first; the threaded handler runs when it returns
    /// [`IrqReturn::WakeThread`].
    Direct {
        hard: Arc<dyn Handler>,
        threaded: Arc<dyn ThreadedHandler>,
    },
    /// The edge was already consumed upstream (e.g. by an I/O expander):
    /// every raw edge runs the threaded handler, there is no fast path.
    PreConsumed { threaded: Arc<dyn ThreadedHandler> },
}

impl Pipeline {
    /// Mode tag without the handlers.
    pub fn mode(&self) -> PipelineMode {
        match self {
            Pipeline::Direct { .. } => PipelineMode::Direct,
            Pipeline::PreConsumed { .. } => PipelineMode::PreConsumed,
        }
    }
}

/// Tag of a [`Pipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMode {
    Direct,
    PreConsumed,
}

impl PipelineMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineMode::Direct => "direct",
            PipelineMode::PreConsumed => "pre-consumed",
        }
    }
}

/// OS interrupt-delivery primitive.
pub trait IrqController {
    /// Bind `pipeline` to `irq`.
    fn request_threaded_irq(
        &mut self,
        irq: IrqNumber,
        pipeline: Pipeline,
        flags: Flags,
        name: &'static str,
    ) -> Result<(), HalError>;

    /// Unbind `irq`.
    ///
    /// On return no immediate handler for `irq` is running or will run
    /// again, and any in-flight threaded handler has returned.
    fn free_irq(&mut self, irq: IrqNumber);

    /// Back-off used while waiting for deferred work to drain.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}
