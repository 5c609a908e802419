//! Host simulation backend.
//!
//! Stands in for the platform collaborators so the pipeline runs, and is
//! tested, on a development machine:
//!
//! - [`SimGpio`]: named lines with injectable acquisition and mapping failures
//! - [`SimIrqController`]: [`fire`](SimIrqController::fire) runs the immediate
//!   handler on the calling thread; each registration gets a worker thread
//!   fed by a one-slot token channel, so pending work coalesces
//! - [`SimClock`] (settable) and [`SystemClock`] (host time)
//! - [`ChannelSink`]: reports delivered over a channel

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::clock::Clock;
use crate::decode::{Report, NANOS_PER_SEC};
use crate::error::HalError;
use crate::gpio::{GpioLine, GpioProvider};
use crate::irq::{Flags, Handler, IrqController, IrqNumber, IrqReturn, Pipeline, PipelineMode};
use crate::report::ReportSink;

// ============================================================================
// GPIO
// ============================================================================

/// Simulated GPIO bank.
#[derive(Default)]
pub struct SimGpio {
    lines: HashMap<Option<&'static str>, IrqNumber>,
    acquire_error: Option<HalError>,
    mapping_error: Option<HalError>,
    held: Arc<AtomicU32>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire `con_id` to `irq`.
    pub fn with_line(mut self, con_id: Option<&'static str>, irq: IrqNumber) -> Self {
        self.lines.insert(con_id, irq);
        self
    }

    /// Every acquisition fails with `err`.
    pub fn fail_acquire(mut self, err: HalError) -> Self {
        self.acquire_error = Some(err);
        self
    }

    /// Lines are handed out but cannot be mapped to an interrupt.
    pub fn fail_mapping(mut self, err: HalError) -> Self {
        self.mapping_error = Some(err);
        self
    }

    /// Lines currently acquired and not yet dropped.
    pub fn held(&self) -> u32 {
        self.held.load(Ordering::Acquire)
    }
}

impl GpioProvider for SimGpio {
    type Line = SimLine;

    fn get_input(&mut self, con_id: Option<&'static str>) -> Result<SimLine, HalError> {
        if let Some(err) = self.acquire_error {
            return Err(err);
        }
        let irq = *self.lines.get(&con_id).ok_or(HalError::NotFound)?;

        self.held.fetch_add(1, Ordering::AcqRel);
        Ok(SimLine {
            irq: match self.mapping_error {
                Some(err) => Err(err),
                None => Ok(irq),
            },
            held: self.held.clone(),
        })
    }
}

/// An acquired simulated line. Released on drop.
pub struct SimLine {
    irq: Result<IrqNumber, HalError>,
    held: Arc<AtomicU32>,
}

impl GpioLine for SimLine {
    fn to_irq(&self) -> Result<IrqNumber, HalError> {
        self.irq
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        self.held.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Interrupt controller
// ============================================================================

struct Registration {
    hard: Option<Arc<dyn Handler>>,
    mode: PipelineMode,
    flags: Flags,
    name: &'static str,
    wake: flume::Sender<()>,
    /// `fire()` calls currently inside the immediate handler.
    firing: Arc<AtomicU32>,
    /// Tokens sent and not yet fully handled.
    pending: Arc<AtomicU32>,
    /// Oneshot lines stay masked until the threaded handler has run.
    masked: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct SimState {
    registered: HashMap<IrqNumber, Registration>,
    reject_next: Option<HalError>,
}

/// Simulated interrupt controller.
///
/// Clones share the same registrations, so one clone can fire edges from a
/// test thread while another tears sources down.
#[derive(Clone, Default)]
pub struct SimIrqController {
    state: Arc<Mutex<SimState>>,
}

impl SimIrqController {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next registration request fails with `err`.
    pub fn reject_next(&self, err: HalError) {
        self.state().reject_next = Some(err);
    }

    pub fn is_registered(&self, irq: IrqNumber) -> bool {
        self.state().registered.contains_key(&irq)
    }

    pub fn flags(&self, irq: IrqNumber) -> Option<Flags> {
        self.state().registered.get(&irq).map(|r| r.flags)
    }

    pub fn mode(&self, irq: IrqNumber) -> Option<PipelineMode> {
        self.state().registered.get(&irq).map(|r| r.mode)
    }

    pub fn name(&self, irq: IrqNumber) -> Option<&'static str> {
        self.state().registered.get(&irq).map(|r| r.name)
    }

    /// Deliver one edge on `irq`.
    ///
    /// Runs the immediate handler (if the pipeline has one) on this thread
    /// and queues a deferred token when asked to. Returns `None` if nothing
    /// is bound to `irq`.
    pub fn fire(&self, irq: IrqNumber) -> Option<IrqReturn> {
        let (hard, wake, firing, pending, masked, oneshot) = {
            let state = self.state();
            let reg = state.registered.get(&irq)?;
            reg.firing.fetch_add(1, Ordering::AcqRel);
            (
                reg.hard.clone(),
                reg.wake.clone(),
                reg.firing.clone(),
                reg.pending.clone(),
                reg.masked.clone(),
                reg.flags.contains(Flags::ONESHOT),
            )
        };

        let ret = if oneshot && masked.load(Ordering::Acquire) {
            IrqReturn::None
        } else {
            let ret = match &hard {
                Some(hard) => hard.handle(),
                None => IrqReturn::WakeThread,
            };
            if ret == IrqReturn::WakeThread {
                if oneshot {
                    masked.store(true, Ordering::Release);
                }
                pending.fetch_add(1, Ordering::AcqRel);
                if wake.try_send(()).is_err() {
                    // a token is already queued: coalesced
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
            }
            ret
        };

        drop(hard);
        drop(wake);
        firing.fetch_sub(1, Ordering::Release);
        Some(ret)
    }

    /// Wait until `irq` has no queued or running deferred work.
    ///
    /// Returns `false` on timeout or if `irq` is not bound.
    pub fn wait_idle(&self, irq: IrqNumber, timeout: Duration) -> bool {
        let pending = match self.state().registered.get(&irq) {
            Some(reg) => reg.pending.clone(),
            None => return false,
        };
        let deadline = Instant::now() + timeout;
        while pending.load(Ordering::Acquire) != 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(200));
        }
        true
    }
}

impl IrqController for SimIrqController {
    fn request_threaded_irq(
        &mut self,
        irq: IrqNumber,
        pipeline: Pipeline,
        flags: Flags,
        name: &'static str,
    ) -> Result<(), HalError> {
        let mut state = self.state();
        if let Some(err) = state.reject_next.take() {
            return Err(err);
        }
        if state.registered.contains_key(&irq) {
            return Err(HalError::Busy);
        }

        let mode = pipeline.mode();
        let (hard, threaded) = match pipeline {
            Pipeline::Direct { hard, threaded } => (Some(hard), threaded),
            Pipeline::PreConsumed { threaded } => (None, threaded),
        };

        let (wake, tokens) = flume::bounded::<()>(1);
        let pending = Arc::new(AtomicU32::new(0));
        let masked = Arc::new(AtomicBool::new(false));

        let worker = {
            let pending = pending.clone();
            let masked = masked.clone();
            thread::Builder::new()
                .name(format!("irq/{}-{}", irq, name))
                .spawn(move || {
                    // ends once every sender is gone and the queue is empty
                    while tokens.recv().is_ok() {
                        threaded.handle_threaded();
                        masked.store(false, Ordering::Release);
                        pending.fetch_sub(1, Ordering::AcqRel);
                    }
                })
                .map_err(|_| HalError::Os(-12))?
        };

        state.registered.insert(
            irq,
            Registration {
                hard,
                mode,
                flags,
                name,
                wake,
                firing: Arc::new(AtomicU32::new(0)),
                pending,
                masked,
                worker,
            },
        );
        Ok(())
    }

    fn free_irq(&mut self, irq: IrqNumber) {
        let Some(reg) = self.state().registered.remove(&irq) else {
            return;
        };

        while reg.firing.load(Ordering::Acquire) != 0 {
            thread::yield_now();
        }

        let Registration { wake, worker, .. } = reg;
        drop(wake);
        if worker.join().is_err() {
            log::error!("deferred worker for IRQ {} panicked", irq);
        }
    }

    fn relax(&self) {
        thread::yield_now();
    }
}

// ============================================================================
// Clocks
// ============================================================================

/// Settable clock. Real and monotonic time advance together.
pub struct SimClock {
    real_ns: AtomicU64,
    monotonic_ns: AtomicU64,
}

impl SimClock {
    /// Clock reading `seconds.subsec_ns` since the epoch, monotonic at 0.
    pub fn at(seconds: u64, subsec_ns: u32) -> Self {
        Self {
            real_ns: AtomicU64::new(seconds * NANOS_PER_SEC + subsec_ns as u64),
            monotonic_ns: AtomicU64::new(0),
        }
    }

    /// Jump the wall clock. Monotonic time is unaffected.
    pub fn set(&self, seconds: u64, subsec_ns: u32) {
        self.real_ns
            .store(seconds * NANOS_PER_SEC + subsec_ns as u64, Ordering::Release);
    }

    /// Let `ns` pass on both clocks.
    pub fn advance(&self, ns: u64) {
        self.real_ns.fetch_add(ns, Ordering::AcqRel);
        self.monotonic_ns.fetch_add(ns, Ordering::AcqRel);
    }
}

impl Clock for SimClock {
    fn real_seconds(&self) -> i64 {
        (self.real_ns.load(Ordering::Acquire) / NANOS_PER_SEC) as i64
    }

    fn real_ns(&self) -> u64 {
        self.real_ns.load(Ordering::Acquire)
    }

    fn monotonic_ns(&self) -> u64 {
        self.monotonic_ns.load(Ordering::Acquire)
    }
}

/// Host wall clock and a monotonic clock started at construction.
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }

    fn since_epoch() -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn real_seconds(&self) -> i64 {
        Self::since_epoch().as_secs() as i64
    }

    fn real_ns(&self) -> u64 {
        Self::since_epoch().as_nanos() as u64
    }

    fn monotonic_ns(&self) -> u64 {
        self.boot.elapsed().as_nanos() as u64
    }
}

// ============================================================================
// Report channel
// ============================================================================

/// Sends every report over an unbounded channel.
pub struct ChannelSink(flume::Sender<Report>);

impl ReportSink for ChannelSink {
    fn emit(&self, report: &Report) {
        // receiver gone: nobody is listening any more
        let _ = self.0.send(*report);
    }
}

/// A [`ChannelSink`] and the receiving end.
pub fn report_channel() -> (ChannelSink, flume::Receiver<Report>) {
    let (tx, rx) = flume::unbounded();
    (ChannelSink(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::ThreadedHandler;

    struct Counting {
        hard: AtomicU32,
        threaded: AtomicU32,
        ret: IrqReturn,
    }

    impl Counting {
        fn new(ret: IrqReturn) -> Arc<Self> {
            Arc::new(Self {
                hard: AtomicU32::new(0),
                threaded: AtomicU32::new(0),
                ret,
            })
        }
    }

    impl Handler for Counting {
        fn handle(&self) -> IrqReturn {
            self.hard.fetch_add(1, Ordering::Relaxed);
            self.ret
        }
    }

    impl ThreadedHandler for Counting {
        fn handle_threaded(&self) -> IrqReturn {
            self.threaded.fetch_add(1, Ordering::Relaxed);
            IrqReturn::Handled
        }
    }

    fn direct(h: &Arc<Counting>) -> Pipeline {
        Pipeline::Direct {
            hard: h.clone(),
            threaded: h.clone(),
        }
    }

    #[test]
    fn test_gpio_lines_and_release() {
        let mut gpio = SimGpio::new().with_line(Some("pps-in"), IrqNumber(12));

        let line = gpio.get_input(Some("pps-in")).unwrap();
        assert_eq!(line.to_irq(), Ok(IrqNumber(12)));
        assert_eq!(gpio.held(), 1);
        assert!(matches!(gpio.get_input(Some("dser")), Err(HalError::NotFound)));

        drop(line);
        assert_eq!(gpio.held(), 0);
    }

    #[test]
    fn test_gpio_failure_injection() {
        let mut gpio = SimGpio::new()
            .with_line(None, IrqNumber(1))
            .fail_mapping(HalError::Invalid);
        let line = gpio.get_input(None).unwrap();
        assert_eq!(line.to_irq(), Err(HalError::Invalid));

        let mut gpio = SimGpio::new().with_line(None, IrqNumber(1)).fail_acquire(HalError::Busy);
        assert!(matches!(gpio.get_input(None), Err(HalError::Busy)));
        assert_eq!(gpio.held(), 0);
    }

    #[test]
    fn test_fire_runs_both_stages() {
        let mut ctl = SimIrqController::new();
        let h = Counting::new(IrqReturn::WakeThread);
        ctl.request_threaded_irq(IrqNumber(5), direct(&h), Flags::TRIGGER_RISING, "test")
            .unwrap();

        assert_eq!(ctl.fire(IrqNumber(5)), Some(IrqReturn::WakeThread));
        assert!(ctl.wait_idle(IrqNumber(5), Duration::from_secs(5)));
        assert_eq!(h.hard.load(Ordering::Relaxed), 1);
        assert_eq!(h.threaded.load(Ordering::Relaxed), 1);

        ctl.free_irq(IrqNumber(5));
        assert!(!ctl.is_registered(IrqNumber(5)));
        assert_eq!(ctl.fire(IrqNumber(5)), None);
    }

    #[test]
    fn test_handled_does_not_wake_worker() {
        let mut ctl = SimIrqController::new();
        let h = Counting::new(IrqReturn::Handled);
        ctl.request_threaded_irq(IrqNumber(6), direct(&h), Flags::TRIGGER_RISING, "test")
            .unwrap();

        ctl.fire(IrqNumber(6));
        ctl.free_irq(IrqNumber(6));
        assert_eq!(h.threaded.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_pre_consumed_has_no_fast_path() {
        let mut ctl = SimIrqController::new();
        let h = Counting::new(IrqReturn::WakeThread);
        ctl.request_threaded_irq(
            IrqNumber(8),
            Pipeline::PreConsumed { threaded: h.clone() },
            Flags::TRIGGER_FALLING,
            "test",
        )
        .unwrap();
        assert_eq!(ctl.mode(IrqNumber(8)), Some(PipelineMode::PreConsumed));

        ctl.fire(IrqNumber(8));
        ctl.free_irq(IrqNumber(8));
        assert_eq!(h.hard.load(Ordering::Relaxed), 0);
        assert_eq!(h.threaded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reject_and_busy() {
        let mut ctl = SimIrqController::new();
        let h = Counting::new(IrqReturn::WakeThread);

        ctl.reject_next(HalError::Os(-22));
        assert_eq!(
            ctl.request_threaded_irq(IrqNumber(2), direct(&h), Flags::TRIGGER_RISING, "a"),
            Err(HalError::Os(-22))
        );

        ctl.request_threaded_irq(IrqNumber(2), direct(&h), Flags::TRIGGER_RISING, "a")
            .unwrap();
        assert_eq!(
            ctl.request_threaded_irq(IrqNumber(2), direct(&h), Flags::TRIGGER_RISING, "b"),
            Err(HalError::Busy)
        );
        assert_eq!(ctl.name(IrqNumber(2)), Some("a"));
        ctl.free_irq(IrqNumber(2));
    }

    #[test]
    fn test_sim_clock() {
        let clock = SimClock::at(100, 5);
        assert_eq!(clock.real_seconds(), 100);
        assert_eq!(clock.real_ns(), 100 * NANOS_PER_SEC + 5);
        assert_eq!(clock.monotonic_ns(), 0);

        clock.advance(NANOS_PER_SEC);
        assert_eq!(clock.real_seconds(), 101);
        assert_eq!(clock.monotonic_ns(), NANOS_PER_SEC);

        clock.set(7, 0);
        assert_eq!(clock.real_seconds(), 7);
        assert_eq!(clock.monotonic_ns(), NANOS_PER_SEC);
    }

    #[test]
    fn test_system_clock_is_sane() {
        let clock = SystemClock::new();
        // after 2020-01-01
        assert!(clock.real_seconds() > 1_577_836_800);
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert!(b >= a);
    }
}
