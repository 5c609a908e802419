//! Error types for RustEdgeStamper.
//!
//! Only the setup path can fail. Once a source is armed, the capture and
//! deferred stages never return errors: anomalies become counters in
//! [`PipelineStats`](crate::stats::PipelineStats) and flags on the report.

use thiserror::Error;

use crate::device::CaptureLayout;
use crate::irq::IrqNumber;

/// Failure reported by a platform collaborator (GPIO, interrupt controller).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The requested line or interrupt does not exist.
    #[error("no such device")]
    NotFound,
    /// The resource is held by someone else.
    #[error("resource busy")]
    Busy,
    /// The request was malformed or not supported by the platform.
    #[error("invalid argument")]
    Invalid,
    /// Raw platform error code.
    #[error("platform error {0}")]
    Os(i32),
}

/// Device Configuration failed. Fatal to the instance: nothing was armed.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No source kind matches the description's `compatible` string.
    #[error("no source kind matches the device description")]
    UnknownCompatible,
    /// The named GPIO line could not be acquired for input.
    #[error("failed to request {line}")]
    GpioUnavailable {
        line: &'static str,
        #[source]
        cause: HalError,
    },
    /// The acquired line has no interrupt mapping.
    #[error("failed to map GPIO to IRQ")]
    IrqMapping(#[source] HalError),
}

/// Binding the interrupt was rejected. Fatal to the instance, never retried.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("failed to acquire IRQ {irq}")]
    Rejected {
        irq: IrqNumber,
        #[source]
        cause: HalError,
    },
    /// The injected shared capture is written with another layout.
    #[error("shared capture layout {shared:?} does not match {kind:?} for IRQ {irq}")]
    CaptureLayoutMismatch {
        irq: IrqNumber,
        kind: CaptureLayout,
        shared: CaptureLayout,
    },
}

/// Either half of a probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}
