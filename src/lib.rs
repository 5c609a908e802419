//! # RustEdgeStamper
//!
//! Two-stage GPIO edge timestamping for PPS, frame-sync and I/O-expander
//! interrupts.
//!
//! ## Architecture
//!
//! ```text
//! DeviceDescription ──configure()──▶ EdgeSource ──arm()──▶ ArmedSource
//!                                                             │
//!   edge ──▶ Edge Capture (immediate) ──▶ CaptureRing ──▶ Deferred Processor ──▶ ReportSink
//!            Clock snapshot, no blocking    seqlock slots    decode + report
//! ```
//!
//! - The two stages share nothing but a lock-free [`CaptureRing`] per source
//!   (or one [`Arc`](alloc::sync::Arc)-shared ring injected into several)
//! - Which stages run is fixed at arm time by the [`Pipeline`] variant
//! - Platform services are traits: [`GpioProvider`], [`IrqController`],
//!   [`Clock`], [`DeviceDescription`], [`ReportSink`], [`ReportHook`]
//!
//! Backends: `sim` on the host (`std` feature), `hal` on ESP-IDF.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod capture;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod device;
pub mod error;
pub mod gpio;
pub mod irq;
pub mod log_globals;
pub mod logging;
pub mod pipeline;
pub mod registration;
pub mod report;
pub mod stats;
pub mod uart_logger;

#[cfg(all(target_os = "espidf", feature = "std"))]
pub mod hal;

#[cfg(feature = "std")]
pub mod sim;

pub use capture::{CaptureRing, CapturedTimestamp, SharedCapture};
pub use clock::Clock;
pub use config::{TimeConfig, BOARD_DEVICES, CONFIG};
pub use decode::{Precision, Report, TimeOfDay};
pub use device::{CaptureLayout, DeviceDescription, DeviceNode, Property, SourceKind};
pub use error::{ConfigurationError, HalError, ProbeError, RegistrationError};
pub use gpio::{GpioLine, GpioProvider};
pub use irq::{Flags, IrqController, IrqNumber, IrqReturn, Pipeline, PipelineMode};
pub use log_globals::{BG_LOG_STREAM, RT_LOG_STREAM};
pub use pipeline::{CaptureBinding, EdgeHandler, PipelineContext};
pub use registration::{probe, ArmedSource, EdgeSource};
pub use report::{LogFacadeSink, LogStreamSink, ReportHook, ReportSink};
pub use stats::{PipelineStats, StatsSnapshot};
