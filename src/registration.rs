//! Source lifecycle: configure, arm, tear down.
//!
//! ```text
//! Unregistered ──configure()──▶ EdgeSource ──arm()──▶ ArmedSource ──teardown()──▶ (gone)
//!                  │                         │
//!                  └─ ConfigurationError      └─ RegistrationError (line released)
//! ```
//!
//! The types enforce the order: only an [`EdgeSource`] can be armed, only an
//! [`ArmedSource`] can be torn down, and each transition consumes its input.

use alloc::sync::Arc;

use crate::device::{
    DeviceDescription, SourceKind, Upstream, PROP_ASSERT_FALLING_EDGE, PROP_BASE_GPIO, PROP_INTERRUPT,
};
use crate::error::{ConfigurationError, ProbeError, RegistrationError};
use crate::gpio::{GpioLine, GpioProvider};
use crate::irq::{Flags, IrqController, IrqNumber, Pipeline, PipelineMode};
use crate::pipeline::{EdgeHandler, PipelineContext};
use crate::stats::PipelineStats;

/// A configured, not yet armed source. Holds its GPIO line.
pub struct EdgeSource<L: GpioLine> {
    kind: SourceKind,
    line: L,
    irq: IrqNumber,
    assert_falling_edge: bool,
    pre_consumed: bool,
}

impl<L: GpioLine> EdgeSource<L> {
    /// Device Configuration.
    ///
    /// Matches the description to a [`SourceKind`], reads the polarity and
    /// upstream properties, acquires the kind's GPIO line for input and maps
    /// it to an interrupt. The only side effect is the acquired line, which
    /// is released again if mapping fails.
    pub fn configure<D, G>(desc: &D, gpio: &mut G) -> Result<Self, ConfigurationError>
    where
        D: DeviceDescription + ?Sized,
        G: GpioProvider<Line = L>,
    {
        let kind = SourceKind::from_compatible(desc.compatible()).ok_or_else(|| {
            log::error!("no driver matches compatible \"{}\"", desc.compatible());
            ConfigurationError::UnknownCompatible
        })?;
        let target = kind.driver_name();

        log::debug!(target: target, "configuring {}", kind.description());

        if kind == SourceKind::Base {
            match desc.property_str(PROP_INTERRUPT) {
                Some(name) => log::info!(target: target, "interrupt={}", name),
                None => log::warn!(target: target, "no \"{}\" property, line unnamed", PROP_INTERRUPT),
            }
        }

        let assert_falling_edge = kind.reads_polarity() && desc.property_bool(PROP_ASSERT_FALLING_EDGE);
        let pre_consumed = match kind.upstream() {
            Upstream::Never => false,
            Upstream::Property => desc.property_bool(PROP_BASE_GPIO),
            Upstream::Always => true,
        };

        let line = gpio.get_input(kind.con_id()).map_err(|cause| {
            log::error!(target: target, "failed to request {}: {}", kind.line_label(), cause);
            ConfigurationError::GpioUnavailable {
                line: kind.line_label(),
                cause,
            }
        })?;

        let irq = line.to_irq().map_err(|cause| {
            log::error!(target: target, "failed to map GPIO to IRQ: {}", cause);
            ConfigurationError::IrqMapping(cause)
        })?;

        Ok(Self {
            kind,
            line,
            irq,
            assert_falling_edge,
            pre_consumed,
        })
    }

    #[inline]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[inline]
    pub fn irq(&self) -> IrqNumber {
        self.irq
    }

    #[inline]
    pub fn assert_falling_edge(&self) -> bool {
        self.assert_falling_edge
    }

    #[inline]
    pub fn pre_consumed(&self) -> bool {
        self.pre_consumed
    }

    /// Pipeline shape this source will be armed with.
    pub fn mode(&self) -> PipelineMode {
        if self.pre_consumed {
            PipelineMode::PreConsumed
        } else {
            PipelineMode::Direct
        }
    }

    /// Registration flags: trigger edge plus the kind's extra flags.
    pub fn flags(&self) -> Flags {
        Flags::trigger(self.assert_falling_edge) | self.kind.extra_flags()
    }

    /// Pipeline Registration.
    ///
    /// Builds the handler, picks the [`Pipeline`] variant once, and binds it
    /// to the interrupt. On rejection the source is dropped (line released)
    /// and nothing is retried.
    pub fn arm<C>(self, controller: &mut C, ctx: PipelineContext) -> Result<ArmedSource<L>, RegistrationError>
    where
        C: IrqController + ?Sized,
    {
        let target = self.kind.driver_name();

        if let Some(shared) = ctx.shared_layout() {
            let kind = self.kind.capture();
            if shared != kind {
                log::error!(target: target, "shared capture is {:?}, this source captures {:?}", shared, kind);
                return Err(RegistrationError::CaptureLayoutMismatch { irq: self.irq, kind, shared });
            }
        }

        let mode = self.mode();
        let handler = Arc::new(EdgeHandler::new(self.irq, self.kind, mode, ctx));

        let pipeline = match mode {
            PipelineMode::Direct => Pipeline::Direct {
                hard: handler.clone(),
                threaded: handler.clone(),
            },
            // the edge was consumed by the expander: no fast path
            PipelineMode::PreConsumed => Pipeline::PreConsumed {
                threaded: handler.clone(),
            },
        };

        // armed before binding so the first edge is not discarded
        handler.set_armed(true);

        if let Err(cause) = controller.request_threaded_irq(self.irq, pipeline, self.flags(), target) {
            handler.set_armed(false);
            log::error!(target: target, "failed to acquire IRQ {}: {}", self.irq, cause);
            return Err(RegistrationError::Rejected { irq: self.irq, cause });
        }

        log::info!(
            target: target,
            "Driver {} has been successfully probed (irq {}, {}, {} edge)",
            target,
            self.irq,
            mode.as_str(),
            if self.assert_falling_edge { "falling" } else { "rising" }
        );

        Ok(ArmedSource {
            kind: self.kind,
            irq: self.irq,
            handler,
            line: self.line,
        })
    }
}

/// Configure then arm.
pub fn probe<D, G, C>(
    desc: &D,
    gpio: &mut G,
    controller: &mut C,
    ctx: PipelineContext,
) -> Result<ArmedSource<G::Line>, ProbeError>
where
    D: DeviceDescription + ?Sized,
    G: GpioProvider,
    C: IrqController + ?Sized,
{
    let source = EdgeSource::configure(desc, gpio)?;
    Ok(source.arm(controller, ctx)?)
}

/// A source bound to its interrupt.
pub struct ArmedSource<L: GpioLine> {
    kind: SourceKind,
    irq: IrqNumber,
    handler: Arc<EdgeHandler>,
    /// Dropped last, after the handlers are gone.
    line: L,
}

impl<L: GpioLine> ArmedSource<L> {
    #[inline]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[inline]
    pub fn irq(&self) -> IrqNumber {
        self.irq
    }

    #[inline]
    pub fn stats(&self) -> &PipelineStats {
        self.handler.stats()
    }

    /// The handler bound to the interrupt.
    #[inline]
    pub fn handler(&self) -> &Arc<EdgeHandler> {
        &self.handler
    }

    /// Unbind and release everything acquired at configure and arm.
    ///
    /// Blocks until no immediate handler can run again and any in-flight
    /// deferred invocation has returned. No report is emitted afterwards.
    pub fn teardown<C>(self, controller: &mut C)
    where
        C: IrqController + ?Sized,
    {
        let target = self.kind.driver_name();

        self.handler.set_armed(false);
        controller.free_irq(self.irq);
        while self.handler.in_flight() != 0 {
            controller.relax();
        }

        let stats = self.handler.stats().snapshot();
        match self.kind {
            SourceKind::Base | SourceKind::FrameSync => {
                log::info!(target: target, "removed IRQ {} ({})", self.irq, stats)
            }
            _ => log::info!(target: target, "removed IRQ {} as PPS source ({})", self.irq, stats),
        }

        drop(self.handler);
        drop(self.line);
    }
}
