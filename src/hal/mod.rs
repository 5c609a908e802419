//! ESP-IDF backend for the platform traits.
//!
//! Thin wrappers around the IDF GPIO driver, its per-pin ISR service and
//! `esp_timer`. Business logic stays in the core modules, the HAL is just I/O.

pub mod clock;
pub mod gpio;
pub mod irq;

pub use clock::EspClock;
pub use gpio::{EspGpio, EspLine};
pub use irq::EspIrqController;

use esp_idf_svc::sys::EspError;

use crate::error::HalError;

impl From<EspError> for HalError {
    fn from(err: EspError) -> Self {
        HalError::Os(err.code())
    }
}
