//! Lifecycle tests: setup failures and teardown ordering
//!
//! Tests:
//! - Configuration and registration failures release the line
//! - Trigger polarity and oneshot masking reach the controller
//! - Teardown waits for an in-flight deferred invocation
//! - Nothing is reported once teardown has returned
//! - Teardown under a stream of edges from another thread
//! - The board table probes cleanly on the simulation backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rust_edge_stamper::sim::{report_channel, SimClock, SimGpio, SimIrqController};
use rust_edge_stamper::{
    probe, ConfigurationError, DeviceNode, Flags, HalError, IrqNumber, IrqReturn, PipelineContext,
    PipelineMode, ProbeError, Property, RegistrationError, Report, ReportSink, BOARD_DEVICES,
};

const WAIT: Duration = Duration::from_secs(2);

fn context() -> (PipelineContext, flume::Receiver<Report>) {
    let (sink, reports) = report_channel();
    let ctx = PipelineContext::new(Arc::new(SimClock::at(86_400, 0)), Arc::new(sink));
    (ctx, reports)
}

#[test_log::test]
fn test_missing_line_fails_configuration() {
    let (ctx, _) = context();
    let mut gpio = SimGpio::new();
    let mut controller = SimIrqController::new();

    let node = DeviceNode::new("adlink-pps-mcu", &[]);
    let err = probe(&node, &mut gpio, &mut controller, ctx).err().unwrap();

    match err {
        ProbeError::Configuration(ConfigurationError::GpioUnavailable { line, cause }) => {
            assert_eq!(line, "pps-mcu-gpios");
            assert_eq!(cause, HalError::NotFound);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(gpio.held(), 0);
}

#[test]
fn test_mapping_failure_releases_line() {
    let (ctx, _) = context();
    let mut gpio = SimGpio::new()
        .with_line(Some("dser"), IrqNumber(5))
        .fail_mapping(HalError::Invalid);
    let mut controller = SimIrqController::new();

    let node = DeviceNode::new("adlink-fsync-gpio", &[]);
    let err = probe(&node, &mut gpio, &mut controller, ctx).err().unwrap();

    assert!(matches!(
        err,
        ProbeError::Configuration(ConfigurationError::IrqMapping(HalError::Invalid))
    ));
    assert_eq!(gpio.held(), 0);
    assert!(!controller.is_registered(IrqNumber(5)));
}

#[test]
fn test_rejected_registration_releases_line() {
    let (ctx, _) = context();
    let mut gpio = SimGpio::new().with_line(Some("pps-in"), IrqNumber(15));
    let mut controller = SimIrqController::new();
    controller.reject_next(HalError::Busy);

    let node = DeviceNode::new("adlink-pps-i210", &[]);
    let err = probe(&node, &mut gpio, &mut controller, ctx).err().unwrap();

    match err {
        ProbeError::Registration(RegistrationError::Rejected { irq, cause }) => {
            assert_eq!(irq, IrqNumber(15));
            assert_eq!(cause, HalError::Busy);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(gpio.held(), 0);
    assert!(!controller.is_registered(IrqNumber(15)));
}

#[test]
fn test_unknown_compatible_acquires_nothing() {
    let (ctx, _) = context();
    let mut gpio = SimGpio::new().with_line(None, IrqNumber(7));
    let mut controller = SimIrqController::new();

    let node = DeviceNode::new("adlink-pps-gps", &[]);
    let err = probe(&node, &mut gpio, &mut controller, ctx).err().unwrap();

    assert!(matches!(err, ProbeError::Configuration(ConfigurationError::UnknownCompatible)));
    assert_eq!(gpio.held(), 0);
}

/// Sink that parks inside `emit` until told to continue.
struct SlowSink {
    entered: flume::Sender<()>,
    release: flume::Receiver<()>,
    finished: AtomicBool,
}

impl ReportSink for SlowSink {
    fn emit(&self, _report: &Report) {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(WAIT);
        self.finished.store(true, Ordering::Release);
    }
}

#[test]
fn test_falling_edge_property_reaches_controller() {
    const PROPS: &[Property<'static>] = &[Property::flag("assert-falling-edge")];
    let (ctx, _) = context();
    let mut gpio = SimGpio::new().with_line(Some("pps-in"), IrqNumber(15));
    let mut controller = SimIrqController::new();

    let node = DeviceNode::new("adlink-pps-i210", PROPS);
    let source = probe(&node, &mut gpio, &mut controller, ctx).unwrap();

    assert_eq!(controller.flags(source.irq()), Some(Flags::TRIGGER_FALLING));
    source.teardown(&mut controller);
}

#[test_log::test]
fn test_base_line_stays_masked_during_deferred_run() {
    let (entered_tx, entered_rx) = flume::unbounded();
    let (release_tx, release_rx) = flume::unbounded();
    let sink = Arc::new(SlowSink {
        entered: entered_tx,
        release: release_rx,
        finished: AtomicBool::new(false),
    });

    let mut gpio = SimGpio::new().with_line(Some("interrupt"), IrqNumber(4));
    let mut controller = SimIrqController::new();
    let ctx = PipelineContext::new(Arc::new(SimClock::at(86_400, 0)), sink.clone());

    let node = DeviceNode::new("adlink-base-gpio", &[]);
    let source = probe(&node, &mut gpio, &mut controller, ctx).unwrap();
    let irq = source.irq();
    assert_eq!(controller.flags(irq), Some(Flags::TRIGGER_RISING | Flags::ONESHOT));

    assert_eq!(controller.fire(irq), Some(IrqReturn::WakeThread));
    entered_rx.recv_timeout(WAIT).unwrap();

    // masked until the deferred run returns
    assert_eq!(controller.fire(irq), Some(IrqReturn::None));
    assert_eq!(controller.fire(irq), Some(IrqReturn::None));

    release_tx.send(()).unwrap();
    assert!(controller.wait_idle(irq, WAIT));
    assert!(sink.finished.load(Ordering::Acquire));
    assert_eq!(source.stats().snapshot().deferred_runs, 1);
    assert!(entered_rx.try_recv().is_err());

    source.teardown(&mut controller);
}

#[test_log::test]
fn test_teardown_waits_for_in_flight_deferred_run() {
    let (entered_tx, entered_rx) = flume::unbounded();
    let (release_tx, release_rx) = flume::unbounded();
    let sink = Arc::new(SlowSink {
        entered: entered_tx,
        release: release_rx,
        finished: AtomicBool::new(false),
    });

    let clock = Arc::new(SimClock::at(86_400, 0));
    let mut gpio = SimGpio::new().with_line(Some("pps-mcu"), IrqNumber(16));
    let mut controller = SimIrqController::new();
    let ctx = PipelineContext::new(clock, sink.clone());

    let node = DeviceNode::new("adlink-pps-mcu", &[]);
    let source = probe(&node, &mut gpio, &mut controller, ctx).unwrap();
    let handler = source.handler().clone();
    let irq = source.irq();

    controller.fire(irq);
    entered_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(handler.in_flight(), 1);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let _ = release_tx.send(());
    });

    let mut teardown_controller = controller.clone();
    source.teardown(&mut teardown_controller);

    assert!(sink.finished.load(Ordering::Acquire), "teardown returned before the deferred run");
    assert_eq!(handler.in_flight(), 0);
    assert!(!handler.is_armed());
    assert_eq!(gpio.held(), 0);

    // unbound: further edges go nowhere
    assert_eq!(controller.fire(irq), None);
    assert_eq!(handler.stats().snapshot().deferred_runs, 1);

    releaser.join().unwrap();
}

#[test_log::test]
fn test_teardown_under_concurrent_edges() {
    let (ctx, reports) = context();
    let mut gpio = SimGpio::new().with_line(Some("pps-in"), IrqNumber(15));
    let mut controller = SimIrqController::new();

    let node = DeviceNode::new("adlink-pps-i210", &[]);
    let source = probe(&node, &mut gpio, &mut controller, ctx).unwrap();
    let handler = source.handler().clone();
    let irq = source.irq();

    let stop = Arc::new(AtomicBool::new(false));
    let edges = {
        let controller = controller.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut delivered = 0u32;
            while !stop.load(Ordering::Acquire) {
                if controller.fire(irq).is_some() {
                    delivered += 1;
                }
            }
            delivered
        })
    };

    thread::sleep(Duration::from_millis(20));
    source.teardown(&mut controller);
    let after_teardown = reports.try_iter().count();

    stop.store(true, Ordering::Release);
    let delivered = edges.join().unwrap();

    assert!(delivered > 0);
    assert_eq!(handler.in_flight(), 0);
    assert!(!handler.is_armed());
    assert_eq!(gpio.held(), 0);
    assert!(after_teardown > 0);
    assert!(reports.try_recv().is_err(), "report after teardown returned");
}

#[test]
fn test_board_table_probes_on_sim() {
    let (ctx, reports) = context();
    let mut controller = SimIrqController::new();
    let mut sources = Vec::new();
    let mut banks = Vec::new();

    for device in BOARD_DEVICES {
        let mut gpio = device
            .lines
            .iter()
            .fold(SimGpio::new(), |gpio, b| gpio.with_line(b.con_id, IrqNumber(b.pin as u32)));
        sources.push(probe(&device.node, &mut gpio, &mut controller, ctx.clone()).unwrap());
        banks.push(gpio);
    }

    assert_eq!(sources.len(), BOARD_DEVICES.len());
    for source in &sources {
        assert!(controller.is_registered(source.irq()));
    }

    let pps_gpio = sources.iter().find(|s| s.kind().driver_name() == "adlink-pps-gpio").unwrap();
    assert_eq!(controller.mode(pps_gpio.irq()), Some(PipelineMode::PreConsumed));

    for source in &sources {
        controller.fire(source.irq());
        assert!(controller.wait_idle(source.irq(), WAIT));
    }
    assert_eq!(reports.try_iter().count(), BOARD_DEVICES.len());

    for source in sources {
        source.teardown(&mut controller);
    }
    assert!(banks.iter().all(|gpio| gpio.held() == 0));
}
