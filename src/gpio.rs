//! GPIO collaborator interface.
//!
//! Acquisition, interrupt mapping and release of one input line. Release is
//! `Drop`: the line goes back to the platform when the handle is dropped.

use crate::error::HalError;
use crate::irq::IrqNumber;

/// Hands out input lines by connection id.
pub trait GpioProvider {
    type Line: GpioLine;

    /// Acquire the line named `con_id` (the `<con_id>-gpios` entry of the
    /// description) as an input. `None` selects the unnamed `gpios` entry.
    fn get_input(&mut self, con_id: Option<&'static str>) -> Result<Self::Line, HalError>;
}

/// An acquired input line.
pub trait GpioLine: Send {
    /// Interrupt identifier for this line.
    fn to_irq(&self) -> Result<IrqNumber, HalError>;
}
