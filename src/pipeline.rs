//! The per-source edge handler: Edge Capture and Deferred Processor.
//!
//! # Architecture
//!
//! ```text
//!            immediate context                      deferred context
//!            ─────────────────                      ────────────────
//! edge ──▶ handle()                              handle_threaded()
//!          ├─ read Clock (per CaptureLayout)      ├─ drain CaptureCursor ──▶ Report ──▶ ReportSink
//!          ├─ CaptureRing::push()  ──────────────▶│  (one fresh report per edge)       └─▶ ReportHook
//!          └─ WakeThread / Handled                └─ nothing pending: one stale report
//!                                                    from CaptureRing::latest() (or zero)
//! ```
//!
//! # Rules
//!
//! - `handle()` never blocks, never allocates, never touches the `log`
//!   facade; its only log path is `rt_log!` into an interrupt-safe stream
//! - `handle_threaded()` never fails; it always returns `Handled`
//! - A report carries the capture of its own edge, or is marked stale

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::capture::{CaptureRing, CapturedTimestamp, SharedCapture};
use crate::clock::Clock;
use crate::config::{TimeConfig, CONFIG};
use crate::cursor::CaptureCursor;
use crate::decode::Report;
use crate::device::{CaptureLayout, SourceKind};
use crate::irq::{Handler, IrqNumber, IrqReturn, PipelineMode, ThreadedHandler};
use crate::log_globals::RT_LOG_STREAM;
use crate::logging::LogStream;
use crate::report::{ReportHook, ReportSink};
use crate::rt_info;
use crate::stats::PipelineStats;

/// Where a source keeps its captures.
pub enum CaptureBinding {
    /// Private ring, drained per edge.
    Owned(CaptureRing),
    /// Ring shared with other sources; reported latest-only.
    Shared(Arc<SharedCapture>),
}

impl CaptureBinding {
    #[inline]
    pub fn ring(&self) -> &CaptureRing {
        match self {
            CaptureBinding::Owned(ring) => ring,
            CaptureBinding::Shared(shared) => shared.ring(),
        }
    }
}

/// Collaborators handed to a source when it is armed.
///
/// Cheap to clone; one context can arm many sources.
#[derive(Clone)]
pub struct PipelineContext {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    config: &'static TimeConfig,
    shared_capture: Option<Arc<SharedCapture>>,
    hook: Option<Arc<dyn ReportHook>>,
    rt_log: &'static LogStream,
}

impl PipelineContext {
    /// Context with the global [`CONFIG`] and [`RT_LOG_STREAM`], a private
    /// capture ring and no hook.
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            clock,
            sink,
            config: &CONFIG,
            shared_capture: None,
            hook: None,
            rt_log: &RT_LOG_STREAM,
        }
    }

    pub fn with_config(mut self, config: &'static TimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Write captures into `shared`, together with every other source armed
    /// with it. Sources must all capture with `shared.layout()`.
    pub fn with_shared_capture(mut self, shared: Arc<SharedCapture>) -> Self {
        self.shared_capture = Some(shared);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ReportHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Stream for fast-path log lines.
    pub fn with_rt_log(mut self, stream: &'static LogStream) -> Self {
        self.rt_log = stream;
        self
    }

    /// Layout of the injected shared capture, if any.
    pub(crate) fn shared_layout(&self) -> Option<CaptureLayout> {
        self.shared_capture.as_ref().map(|shared| shared.layout())
    }
}

/// Decrements the in-flight count when a deferred invocation ends.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

/// Both stages of one armed source.
pub struct EdgeHandler {
    irq: IrqNumber,
    kind: SourceKind,
    mode: PipelineMode,
    capture: CaptureBinding,
    cursor: CaptureCursor,
    /// `edge + 1` of the last shared capture reported, 0 if none.
    last_shared_edge: AtomicU32,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    config: &'static TimeConfig,
    hook: Option<Arc<dyn ReportHook>>,
    rt_log: &'static LogStream,
    stats: PipelineStats,
    armed: AtomicBool,
    in_flight: AtomicU32,
}

impl EdgeHandler {
    /// Build a disarmed handler.
    pub fn new(irq: IrqNumber, kind: SourceKind, mode: PipelineMode, ctx: PipelineContext) -> Self {
        let capture = match ctx.shared_capture {
            Some(ring) => CaptureBinding::Shared(ring),
            None => CaptureBinding::Owned(CaptureRing::new()),
        };
        let cursor = CaptureCursor::new(capture.ring());

        Self {
            irq,
            kind,
            mode,
            capture,
            cursor,
            last_shared_edge: AtomicU32::new(0),
            clock: ctx.clock,
            sink: ctx.sink,
            config: ctx.config,
            hook: ctx.hook,
            rt_log: ctx.rt_log,
            stats: PipelineStats::new(),
            armed: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn irq(&self) -> IrqNumber {
        self.irq
    }

    #[inline]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[inline]
    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    #[inline]
    pub fn capture(&self) -> &CaptureBinding {
        &self.capture
    }

    #[inline]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub(crate) fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }

    /// Deferred invocations currently running.
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Read the clock the way this kind captures.
    #[inline]
    fn snapshot(&self, layout: CaptureLayout) -> CapturedTimestamp {
        match layout {
            CaptureLayout::None => CapturedTimestamp::ZERO,
            CaptureLayout::RealSeconds => CapturedTimestamp {
                seconds: self.clock.real_seconds(),
                nanoseconds: 0,
            },
            CaptureLayout::RealSecondsAndNanos => CapturedTimestamp {
                seconds: self.clock.real_seconds(),
                nanoseconds: self.clock.real_ns(),
            },
        }
    }

    fn emit(&self, capture: CapturedTimestamp, offset_minutes: i32, fresh: bool, edge: Option<u32>) {
        let report = Report::decode(self.irq, self.kind, capture, offset_minutes, fresh, edge);
        self.stats.record_report(fresh);
        self.sink.emit(&report);
        if let Some(hook) = &self.hook {
            hook.on_report(&report);
        }
    }

    /// Report the newest shared capture; fresh only if no earlier
    /// invocation of this source reported the same edge.
    fn emit_shared_latest(&self, offset_minutes: i32) {
        match self.capture.ring().latest() {
            Some((edge, ts)) => {
                let seen = self.last_shared_edge.swap(edge.wrapping_add(1), Ordering::Relaxed);
                self.emit(ts, offset_minutes, seen != edge.wrapping_add(1), Some(edge));
            }
            None => self.emit(CapturedTimestamp::ZERO, offset_minutes, false, None),
        }
    }
}

impl Handler for EdgeHandler {
    /// Edge Capture.
    ///
    /// # Timing
    ///
    /// O(1): at most two clock reads, one ring push, and for fast-path-only
    /// kinds one formatted push into the interrupt-safe log stream.
    fn handle(&self) -> IrqReturn {
        if !self.is_armed() {
            return IrqReturn::None;
        }

        let layout = self.kind.capture();
        if layout == CaptureLayout::None {
            self.stats.record_edge();
            return IrqReturn::WakeThread;
        }

        let ts = self.snapshot(layout);
        self.capture.ring().push(ts);
        self.stats.record_edge();

        if self.kind.fast_path_only() {
            let mono_ns = self.clock.monotonic_ns();
            rt_info!(self.rt_log, (mono_ns / 1_000) as i64, "irq={}, ns={}", self.irq, mono_ns);
            return IrqReturn::Handled;
        }

        IrqReturn::WakeThread
    }
}

impl ThreadedHandler for EdgeHandler {
    /// Deferred Processor.
    fn handle_threaded(&self) -> IrqReturn {
        let _in_flight = InFlight::enter(&self.in_flight);
        self.stats.record_deferred_run();

        let offset = self.config.offset_minutes();

        match &self.capture {
            CaptureBinding::Shared(_) => self.emit_shared_latest(offset),
            CaptureBinding::Owned(ring) => {
                let mut emitted = 0u32;
                if self.mode == PipelineMode::Direct {
                    for (edge, ts) in self.cursor.drain(ring, &self.stats) {
                        self.emit(ts, offset, true, Some(edge));
                        emitted += 1;
                    }
                }
                if emitted == 0 {
                    // coalesced token, or no fast path wrote anything
                    let (edge, ts) = match ring.latest() {
                        Some((edge, ts)) => (Some(edge), ts),
                        None => (None, CapturedTimestamp::ZERO),
                    };
                    self.emit(ts, offset, false, edge);
                }
            }
        }

        IrqReturn::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::NANOS_PER_SEC;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct TestClock {
        seconds: AtomicU64,
        nanos: AtomicU64,
    }

    impl TestClock {
        fn at(seconds: u64, subsec: u64) -> Arc<Self> {
            Arc::new(Self {
                seconds: AtomicU64::new(seconds),
                nanos: AtomicU64::new(seconds * NANOS_PER_SEC + subsec),
            })
        }
    }

    impl Clock for TestClock {
        fn real_seconds(&self) -> i64 {
            self.seconds.load(Ordering::Relaxed) as i64
        }
        fn real_ns(&self) -> u64 {
            self.nanos.load(Ordering::Relaxed)
        }
        fn monotonic_ns(&self) -> u64 {
            self.nanos.load(Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Report>>);

    impl ReportSink for Collect {
        fn emit(&self, report: &Report) {
            self.0.lock().unwrap().push(*report);
        }
    }

    impl ReportHook for Collect {
        fn on_report(&self, report: &Report) {
            self.0.lock().unwrap().push(*report);
        }
    }

    const DAY: u64 = 20_000 * 86_400;

    fn handler(kind: SourceKind, mode: PipelineMode, clock: Arc<TestClock>) -> (EdgeHandler, Arc<Collect>) {
        static TEST_CONFIG: TimeConfig = TimeConfig::new(0);
        static TEST_RT_LOG: LogStream = LogStream::new();
        let sink = Arc::new(Collect::default());
        let ctx = PipelineContext::new(clock, sink.clone())
            .with_config(&TEST_CONFIG)
            .with_rt_log(&TEST_RT_LOG);
        let h = EdgeHandler::new(IrqNumber(7), kind, mode, ctx);
        h.set_armed(true);
        (h, sink)
    }

    #[test]
    fn test_disarmed_handler_ignores_edges() {
        let (h, _) = handler(SourceKind::PpsI210, PipelineMode::Direct, TestClock::at(DAY, 0));
        h.set_armed(false);
        assert_eq!(h.handle(), IrqReturn::None);
        assert_eq!(h.stats().snapshot().edges, 0);
    }

    #[test]
    fn test_direct_edge_reports_its_own_capture() {
        let clock = TestClock::at(DAY + 12 * 3600, 0);
        let (h, sink) = handler(SourceKind::PpsMcu, PipelineMode::Direct, clock);

        assert_eq!(h.handle(), IrqReturn::WakeThread);
        assert_eq!(h.handle_threaded(), IrqReturn::Handled);

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!((reports[0].hour, reports[0].minute, reports[0].second), (12, 0, 0));
        assert!(reports[0].fresh);
        assert_eq!(reports[0].edge, Some(0));
    }

    #[test]
    fn test_coalesced_token_drains_every_edge() {
        let clock = TestClock::at(DAY, 0);
        let (h, sink) = handler(SourceKind::PpsI210, PipelineMode::Direct, clock.clone());

        for s in 0..3u64 {
            clock.seconds.store(DAY + s, Ordering::Relaxed);
            clock.nanos.store((DAY + s) * NANOS_PER_SEC + s, Ordering::Relaxed);
            h.handle();
        }
        h.handle_threaded();
        // second token had nothing left to drain
        h.handle_threaded();

        let reports = sink.0.lock().unwrap();
        let seconds: Vec<_> = reports.iter().map(|r| (r.second, r.fresh)).collect();
        assert_eq!(seconds, vec![(0, true), (1, true), (2, true), (2, false)]);
        assert_eq!(h.stats().snapshot().stale_reports, 1);
    }

    #[test]
    fn test_pre_consumed_reports_zero_time() {
        let (h, sink) = handler(SourceKind::FrameSync, PipelineMode::PreConsumed, TestClock::at(DAY + 5, 1));

        assert_eq!(h.handle_threaded(), IrqReturn::Handled);

        let reports = sink.0.lock().unwrap();
        assert_eq!(format!("{}", reports[0]), "bottom-irq=7, 00:00:00.000 (stale)");
        assert_eq!(reports[0].edge, None);
    }

    #[test]
    fn test_fast_path_only_kind_logs_and_finishes() {
        static RT: LogStream = LogStream::new();
        let clock = TestClock::at(0, 1_500);
        let sink = Arc::new(Collect::default());
        let ctx = PipelineContext::new(clock, sink.clone()).with_rt_log(&RT);
        let h = EdgeHandler::new(IrqNumber(3), SourceKind::PpsGpio, PipelineMode::Direct, ctx);
        h.set_armed(true);

        assert_eq!(h.handle(), IrqReturn::Handled);

        let line = RT.drain().unwrap();
        assert_eq!(line.message(), "irq=3, ns=1500");
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(h.capture().ring().latest().map(|(_, ts)| ts.nanoseconds), Some(1_500));
    }

    #[test]
    fn test_shared_capture_reported_latest_only() {
        let shared = Arc::new(SharedCapture::new(CaptureLayout::RealSecondsAndNanos));
        let ring = shared.ring();
        let clock = TestClock::at(0, 2 * NANOS_PER_SEC + 9);
        let sink = Arc::new(Collect::default());
        let ctx = PipelineContext::new(clock, sink.clone()).with_shared_capture(shared.clone());

        let h = EdgeHandler::new(IrqNumber(4), SourceKind::PpsGpio, PipelineMode::PreConsumed, ctx);
        h.set_armed(true);
        assert!(matches!(h.capture(), CaptureBinding::Shared(_)));

        ring.push(CapturedTimestamp { seconds: 0, nanoseconds: NANOS_PER_SEC });
        ring.push(CapturedTimestamp { seconds: 2, nanoseconds: 2 * NANOS_PER_SEC + 9 });
        h.handle_threaded();
        h.handle_threaded();

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].edge, Some(1));
        assert_eq!(reports[0].nanosecond, Some(9));
        assert!(reports[0].fresh);
        assert!(!reports[1].fresh);
    }

    #[test]
    fn test_hook_sees_every_report() {
        let clock = TestClock::at(DAY, 0);
        let sink = Arc::new(Collect::default());
        let hook = Arc::new(Collect::default());
        let ctx = PipelineContext::new(clock, sink.clone()).with_hook(hook.clone());
        let h = EdgeHandler::new(IrqNumber(9), SourceKind::PpsMcu, PipelineMode::Direct, ctx);
        h.set_armed(true);

        h.handle();
        h.handle_threaded();

        assert_eq!(*hook.0.lock().unwrap(), *sink.0.lock().unwrap());
        assert_eq!(h.in_flight(), 0);
    }
}
