//! Report output: where decoded records go, and the optional per-report
//! capability hook.
//!
//! Both traits are called from the deferred context only, so implementations
//! may block (UART writes, file I/O, locks).

use alloc::sync::Arc;

use crate::clock::Clock;
use crate::decode::Report;
use crate::logging::{LogLevel, LogStream};
use crate::rt_log;

/// Receives every report a deferred invocation produces.
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &Report);
}

/// Optional capability invoked after each report is emitted.
///
/// This is the seam for outputs the core does not implement itself: an
/// RMC-style sentence written to a serial port, a PPS-out pulse on a spare
/// GPIO. Attach one per source with
/// [`PipelineContext::with_hook`](crate::pipeline::PipelineContext::with_hook);
/// on the board it belongs on the MCU-relayed PPS source.
pub trait ReportHook: Send + Sync {
    fn on_report(&self, report: &Report);
}

/// Writes reports to the `log` facade, one `info` line each, with the
/// driver name as target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFacadeSink;

impl ReportSink for LogFacadeSink {
    fn emit(&self, report: &Report) {
        if report.fresh {
            log::info!(target: report.source.driver_name(), "{}", report);
        } else {
            log::debug!(target: report.source.driver_name(), "{}", report);
        }
    }
}

/// Pushes reports into a [`LogStream`] for the log drain.
///
/// Never blocks; a full stream drops the line and counts it.
pub struct LogStreamSink {
    stream: &'static LogStream,
    clock: Arc<dyn Clock>,
}

impl LogStreamSink {
    pub fn new(stream: &'static LogStream, clock: Arc<dyn Clock>) -> Self {
        Self { stream, clock }
    }
}

impl ReportSink for LogStreamSink {
    fn emit(&self, report: &Report) {
        let now_us = (self.clock.monotonic_ns() / 1_000) as i64;
        let level = if report.fresh { LogLevel::Info } else { LogLevel::Debug };
        rt_log!(level, self.stream, now_us, "{}", report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedTimestamp;
    use crate::device::SourceKind;
    use crate::irq::IrqNumber;

    struct FixedClock;

    impl Clock for FixedClock {
        fn real_seconds(&self) -> i64 {
            0
        }
        fn real_ns(&self) -> u64 {
            0
        }
        fn monotonic_ns(&self) -> u64 {
            42_000
        }
    }

    fn noon_report(fresh: bool) -> Report {
        let secs = 20_000 * 86_400 + 12 * 3600;
        Report::decode(
            IrqNumber(11),
            SourceKind::PpsMcu,
            CapturedTimestamp { seconds: secs, nanoseconds: 0 },
            0,
            fresh,
            Some(0),
        )
    }

    #[test]
    fn test_log_stream_sink_formats_report() {
        static STREAM: LogStream = LogStream::new();
        let sink = LogStreamSink::new(&STREAM, Arc::new(FixedClock));

        sink.emit(&noon_report(true));
        sink.emit(&noon_report(false));

        let first = STREAM.drain().unwrap();
        assert_eq!(first.timestamp_us, 42);
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.message(), "bottom-irq=11, 12:00:00");

        let second = STREAM.drain().unwrap();
        assert_eq!(second.level, LogLevel::Debug);
        assert_eq!(second.message(), "bottom-irq=11, 12:00:00 (stale)");
    }

    #[test_log::test]
    fn test_log_facade_sink_as_pipeline_sink() {
        let sink: Arc<dyn ReportSink> = Arc::new(LogFacadeSink);
        sink.emit(&noon_report(true));
        sink.emit(&noon_report(false));
    }
}
