//! RustEdgeStamper - Main entry point
//!
//! On target:
//! 1. Initialize ESP-IDF, logger and NVS-backed time settings
//! 2. Start the UART log drain
//! 3. Probe every source in the board table
//! 4. Idle, printing per-source counters
//!
//! On the host the same board table is probed against the simulation
//! backend and driven by synthetic edges.

#[cfg(target_os = "espidf")]
fn main() {
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::sys as esp_idf_sys;
    use heapless::Vec;
    use std::sync::Arc;

    use rust_edge_stamper::config::nvs::{self, LoadResult};
    use rust_edge_stamper::hal::{EspClock, EspGpio, EspIrqController, EspLine};
    use rust_edge_stamper::uart_logger::{init_uart_logger, uart_logger_task, UartLoggerConfig};
    use rust_edge_stamper::{
        probe, ArmedSource, LogStreamSink, PipelineContext, BG_LOG_STREAM, BOARD_DEVICES, CONFIG,
    };

    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("{}", env!("VERSION_STRING"));

    match nvs::load_time_config(&CONFIG) {
        Ok(LoadResult::UpToDate) => log::info!("UTC offset {} min (NVS)", CONFIG.offset_minutes()),
        Ok(LoadResult::FreshInstall) => log::info!("No stored time settings, using defaults"),
        Err(e) => log::warn!("Time settings not loaded: {}", e),
    }

    match Peripherals::take() {
        Ok(peripherals) => {
            match init_uart_logger(peripherals.uart1, peripherals.pins.gpio6, &UartLoggerConfig::default()) {
                Ok(mut uart) => {
                    let spawned = std::thread::Builder::new()
                        .name("log-drain".into())
                        .stack_size(4096)
                        .spawn(move || {
                            uart_logger_task(&mut uart);
                        });
                    if let Err(e) = spawned {
                        log::error!("Log drain not started: {}", e);
                    }
                }
                Err(e) => log::error!("UART logger init failed: {}", e),
            }
        }
        Err(e) => log::error!("Peripherals unavailable: {}", e),
    }

    let clock = Arc::new(EspClock::new());
    let sink = Arc::new(LogStreamSink::new(&BG_LOG_STREAM, clock.clone()));
    let ctx = PipelineContext::new(clock, sink);

    let mut controller = EspIrqController::new();
    let mut sources: Vec<ArmedSource<EspLine>, 8> = Vec::new();

    for device in BOARD_DEVICES {
        let mut gpio = EspGpio::new(device);
        match probe(&device.node, &mut gpio, &mut controller, ctx.clone()) {
            Ok(source) => {
                if let Err(source) = sources.push(source) {
                    log::error!("{}: too many sources, releasing", device.label);
                    source.teardown(&mut controller);
                }
            }
            Err(e) => log::error!("{}: {}", device.label, e),
        }
    }

    log::info!("{} of {} sources armed", sources.len(), BOARD_DEVICES.len());

    loop {
        // SAFETY: plain FreeRTOS delay from task context
        unsafe {
            esp_idf_sys::vTaskDelay(10_000);
        }
        for source in &sources {
            log::info!("{}: {}", source.kind().driver_name(), source.stats().snapshot());
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    use heapless::Vec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use rust_edge_stamper::config::nvs;
    use rust_edge_stamper::sim::{SimGpio, SimIrqController, SimLine, SystemClock};
    use rust_edge_stamper::uart_logger::stdout_logger_task;
    use rust_edge_stamper::{
        probe, ArmedSource, IrqNumber, LogFacadeSink, PipelineContext, BOARD_DEVICES, CONFIG,
    };

    static STOP: AtomicBool = AtomicBool::new(false);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("{}", env!("VERSION_STRING"));

    let interval = Duration::from_millis(env_or("STAMPER_PPS_INTERVAL_MS", 1000));
    let edges: u32 = env_or("STAMPER_EDGES", 5);
    if let Some(minutes) = std::env::var("STAMPER_UTC_OFFSET_MIN").ok().and_then(|v| v.parse().ok()) {
        CONFIG.set_offset_minutes(minutes);
        if let Err(e) = nvs::save_time_config(&CONFIG) {
            log::debug!("UTC offset not persisted: {}", e);
        }
    }

    let drain = thread::Builder::new()
        .name("log-drain".into())
        .spawn(|| stdout_logger_task(&STOP));

    // reports through env_logger; the drain carries the fast-path lines
    let ctx = PipelineContext::new(Arc::new(SystemClock::new()), Arc::new(LogFacadeSink));

    let mut controller = SimIrqController::new();
    let mut sources: Vec<ArmedSource<SimLine>, 8> = Vec::new();

    for device in BOARD_DEVICES {
        let mut gpio = device
            .lines
            .iter()
            .fold(SimGpio::new(), |gpio, b| gpio.with_line(b.con_id, IrqNumber(b.pin as u32)));

        match probe(&device.node, &mut gpio, &mut controller, ctx.clone()) {
            Ok(source) => {
                if let Err(source) = sources.push(source) {
                    log::error!("{}: too many sources, releasing", device.label);
                    source.teardown(&mut controller);
                }
            }
            Err(e) => log::error!("{}: {}", device.label, e),
        }
    }

    for _ in 0..edges {
        thread::sleep(interval);
        for source in &sources {
            controller.fire(source.irq());
        }
    }

    for source in sources {
        controller.wait_idle(source.irq(), Duration::from_secs(1));
        source.teardown(&mut controller);
    }

    STOP.store(true, Ordering::Release);
    match drain {
        Ok(handle) => {
            let _ = handle.join();
        }
        Err(e) => log::error!("Log drain not started: {}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
