//! GPIO lines for the board's interrupt sources.
//!
//! Pins come from the [`BoardDevice`] table; the interrupt number of a line
//! is its GPIO number, which is what the per-pin ISR service keys on.

use esp_idf_svc::sys::{
    esp, gpio_config, gpio_config_t, gpio_int_type_t_GPIO_INTR_DISABLE, gpio_mode_t_GPIO_MODE_INPUT,
    gpio_pulldown_t_GPIO_PULLDOWN_DISABLE, gpio_pullup_t_GPIO_PULLUP_DISABLE, gpio_reset_pin,
};
use portable_atomic::{AtomicU64, Ordering};

use crate::config::BoardDevice;
use crate::error::HalError;
use crate::gpio::{GpioLine, GpioProvider};
use crate::irq::IrqNumber;

/// Pins currently held as inputs, one bit per GPIO.
static HELD_PINS: AtomicU64 = AtomicU64::new(0);

/// Hands out the lines one board device is wired to.
pub struct EspGpio {
    device: &'static BoardDevice,
}

impl EspGpio {
    pub fn new(device: &'static BoardDevice) -> Self {
        Self { device }
    }
}

impl GpioProvider for EspGpio {
    type Line = EspLine;

    fn get_input(&mut self, con_id: Option<&'static str>) -> Result<EspLine, HalError> {
        let pin = self.device.pin(con_id).ok_or(HalError::NotFound)?;
        if !(0..64).contains(&pin) {
            return Err(HalError::Invalid);
        }

        let bit = 1u64 << pin;
        if HELD_PINS.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
            return Err(HalError::Busy);
        }

        let cfg = gpio_config_t {
            pin_bit_mask: bit,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            ..Default::default()
        };

        // SAFETY: cfg is a fully initialised config for a single valid pin.
        if let Err(err) = esp!(unsafe { gpio_config(&cfg) }) {
            HELD_PINS.fetch_and(!bit, Ordering::AcqRel);
            return Err(err.into());
        }

        Ok(EspLine { pin })
    }
}

/// A GPIO configured as input. Reset to its default state on drop.
#[derive(Debug)]
pub struct EspLine {
    pin: i32,
}

impl GpioLine for EspLine {
    fn to_irq(&self) -> Result<IrqNumber, HalError> {
        Ok(IrqNumber(self.pin as u32))
    }
}

impl Drop for EspLine {
    fn drop(&mut self) {
        // SAFETY: the pin was validated in get_input and is owned by this line.
        unsafe {
            gpio_reset_pin(self.pin);
        }
        HELD_PINS.fetch_and(!(1u64 << self.pin), Ordering::AcqRel);
    }
}
