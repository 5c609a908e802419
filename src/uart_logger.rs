//! Log drain: moves [`LogStream`] entries to a blocking output.
//!
//! On target the output is UART1 TX (GPIO6 by default, external USB-UART
//! adapter). On the host it is stdout.
//!
//! ```text
//! RT_LOG_STREAM ─┐
//!                ├──drain_once()──▶ format_log_entry() ──▶ UART / stdout
//! BG_LOG_STREAM ─┘
//! ```
//!
//! **WARNING**: GPIO6 conflicts with Octal PSRAM. Only use on Quad flash boards!

use crate::logging::{format_to_buffer, LogEntry, LogStream};

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::gpio;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::peripheral::Peripheral;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::uart::{self, UartTxDriver};

/// Bytes for one formatted line.
pub const LINE_BUF_LEN: usize = 256;

/// Interval between dropped-message reports.
pub const DROPPED_REPORT_INTERVAL_US: i64 = 10_000_000;

/// UART configuration for logging.
pub struct UartLoggerConfig {
    pub baud_rate: u32,
    pub tx_pin: u8,
}

impl Default for UartLoggerConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            tx_pin: 6,
        }
    }
}

/// Format log entry to bytes.
///
/// Format: `[timestamp_us] LEVEL: message\n`
pub fn format_log_entry(entry: &LogEntry, buf: &mut [u8]) -> usize {
    format_to_buffer(
        buf,
        format_args!(
            "[{:10}] {}: {}\n",
            entry.timestamp_us,
            entry.level.as_str(),
            entry.message()
        ),
    )
}

/// Drain every stream once, in order, through `write`.
///
/// Returns the number of entries written.
pub fn drain_once<const N: usize>(
    streams: &[&LogStream<N>],
    mut write: impl FnMut(&[u8]),
) -> usize {
    let mut format_buf = [0u8; LINE_BUF_LEN];
    let mut written = 0;

    for stream in streams {
        while let Some(entry) = stream.drain() {
            let len = format_log_entry(&entry, &mut format_buf);
            write(&format_buf[..len]);
            written += 1;
        }
    }
    written
}

/// Rate-limited report of dropped messages.
pub struct DroppedReporter {
    last_report_us: i64,
}

impl DroppedReporter {
    pub const fn new() -> Self {
        Self { last_report_us: 0 }
    }

    /// Write one warning line if the interval has elapsed and anything was
    /// dropped on any stream. Returns `true` if a line was written.
    pub fn poll<const N: usize>(
        &mut self,
        now_us: i64,
        streams: &[&LogStream<N>; 2],
        mut write: impl FnMut(&[u8]),
    ) -> bool {
        if now_us - self.last_report_us <= DROPPED_REPORT_INTERVAL_US {
            return false;
        }
        self.last_report_us = now_us;

        let rt_dropped = streams[0].take_dropped();
        let bg_dropped = streams[1].take_dropped();
        if rt_dropped == 0 && bg_dropped == 0 {
            return false;
        }

        let mut msg = [0u8; 64];
        let len = format_to_buffer(
            &mut msg,
            format_args!("[WARN] Dropped: RT={}, BG={}\n", rt_dropped, bg_dropped),
        );
        write(&msg[..len]);
        true
    }
}

impl Default for DroppedReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize UART1 TX-only for logging output.
#[cfg(target_os = "espidf")]
pub fn init_uart_logger<'d>(
    uart: impl Peripheral<P = esp_idf_svc::hal::uart::UART1> + 'd,
    tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'd,
    config: &UartLoggerConfig,
) -> Result<UartTxDriver<'d>, esp_idf_svc::sys::EspError> {
    let uart_config = uart::config::Config::default()
        .baudrate(esp_idf_svc::hal::units::Hertz(config.baud_rate));

    UartTxDriver::new(
        uart,
        tx_pin,
        Option::<gpio::AnyIOPin>::None, // CTS
        Option::<gpio::AnyIOPin>::None, // RTS
        &uart_config,
    )
}

/// UART log consumer task.
///
/// Drains RT_LOG_STREAM first, then BG_LOG_STREAM, forever.
#[cfg(target_os = "espidf")]
pub fn uart_logger_task(uart: &mut UartTxDriver<'_>) -> ! {
    use crate::{BG_LOG_STREAM, RT_LOG_STREAM};

    let streams = [&RT_LOG_STREAM, &BG_LOG_STREAM];
    let mut reporter = DroppedReporter::new();

    loop {
        let written = drain_once(&streams, |bytes| {
            let _ = uart.write(bytes);
        });

        // SAFETY: esp_timer_get_time is callable from any task
        let now = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
        reporter.poll(now, &streams, |bytes| {
            let _ = uart.write(bytes);
        });

        if written == 0 {
            // SAFETY: plain FreeRTOS delay from task context
            unsafe {
                esp_idf_svc::sys::vTaskDelay(10);
            }
        }
    }
}

/// Host log consumer: drains both global streams to stdout until `stop`
/// is set, then drains once more.
#[cfg(all(feature = "std", not(target_os = "espidf")))]
pub fn stdout_logger_task(stop: &core::sync::atomic::AtomicBool) {
    use core::sync::atomic::Ordering;
    use std::io::Write;
    use std::time::{Duration, Instant};

    use crate::{BG_LOG_STREAM, RT_LOG_STREAM};

    let streams = [&RT_LOG_STREAM, &BG_LOG_STREAM];
    let mut reporter = DroppedReporter::new();
    let started = Instant::now();
    let stdout = std::io::stdout();

    loop {
        let stopping = stop.load(Ordering::Acquire);
        let mut out = stdout.lock();
        let written = drain_once(&streams, |bytes| {
            let _ = out.write_all(bytes);
        });
        reporter.poll(started.elapsed().as_micros() as i64, &streams, |bytes| {
            let _ = out.write_all(bytes);
        });
        let _ = out.flush();
        drop(out);

        if stopping {
            break;
        }
        if written == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
