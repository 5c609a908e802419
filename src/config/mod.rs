//! Module: config
//!
//! Purpose: runtime time settings and the board's source table.
//!
//! Architecture:
//! - `CONFIG`: process-wide time settings, read by every deferred worker
//! - `BOARD_DEVICES`: the interrupt sources present on this board, with the
//!   pin behind each GPIO connection id
//! - `nvs`: persistence of `CONFIG` on target
//!
//! Safety: every field is an atomic. Readers never lock; a writer changing
//! the offset is seen by the next deferred invocation.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::device::{
    DeviceNode, Property, PropertyValue, PROP_ASSERT_FALLING_EDGE, PROP_BASE_GPIO, PROP_INTERRUPT,
};

pub mod nvs;

/// Time settings shared by all sources.
pub struct TimeConfig {
    /// Local offset from UTC, minutes. Only whole hours reach reports.
    utc_offset_minutes: AtomicI32,
}

impl TimeConfig {
    pub const fn new(utc_offset_minutes: i32) -> Self {
        Self {
            utc_offset_minutes: AtomicI32::new(utc_offset_minutes),
        }
    }

    #[inline]
    pub fn offset_minutes(&self) -> i32 {
        self.utc_offset_minutes.load(Ordering::Relaxed)
    }

    pub fn set_offset_minutes(&self, minutes: i32) {
        self.utc_offset_minutes.store(minutes, Ordering::Relaxed);
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Global time settings.
pub static CONFIG: TimeConfig = TimeConfig::new(0);

/// One GPIO connection of a board device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpioBinding {
    /// `None` for the unnamed `gpios` entry.
    pub con_id: Option<&'static str>,
    pub pin: i32,
}

/// An interrupt source fitted on the board.
#[derive(Clone, Copy, Debug)]
pub struct BoardDevice {
    /// Instance label for logs and registration names.
    pub label: &'static str,
    pub node: DeviceNode<'static>,
    pub lines: &'static [GpioBinding],
}

impl BoardDevice {
    /// Pin for `con_id`, if the board wires one.
    pub fn pin(&self, con_id: Option<&str>) -> Option<i32> {
        self.lines.iter().find(|b| b.con_id == con_id).map(|b| b.pin)
    }
}

#[cfg(not(feature = "esp32p4"))]
mod pins {
    pub const EXPANDER_INT: i32 = 4;
    pub const DSER: i32 = 5;
    pub const PPS_GPIO: i32 = 7;
    pub const PPS_IN: i32 = 15;
    pub const PPS_MCU: i32 = 16;
}

#[cfg(feature = "esp32p4")]
mod pins {
    pub const EXPANDER_INT: i32 = 20;
    pub const DSER: i32 = 21;
    pub const PPS_GPIO: i32 = 22;
    pub const PPS_IN: i32 = 23;
    pub const PPS_MCU: i32 = 32;
}

/// Sources on this board, probed in order at boot.
pub static BOARD_DEVICES: &[BoardDevice] = &[
    BoardDevice {
        label: "base-exp0",
        node: DeviceNode {
            compatible: "adlink-base-gpio",
            properties: &[Property { name: PROP_INTERRUPT, value: PropertyValue::Str("exp0-int") }],
        },
        lines: &[GpioBinding { con_id: Some("interrupt"), pin: pins::EXPANDER_INT }],
    },
    BoardDevice {
        label: "fsync",
        node: DeviceNode { compatible: "adlink-fsync-gpio", properties: &[] },
        lines: &[GpioBinding { con_id: Some("dser"), pin: pins::DSER }],
    },
    BoardDevice {
        label: "pps-gpio",
        node: DeviceNode {
            compatible: "adlink-pps-gpio",
            properties: &[
                Property { name: PROP_ASSERT_FALLING_EDGE, value: PropertyValue::Flag },
                Property { name: PROP_BASE_GPIO, value: PropertyValue::Flag },
            ],
        },
        lines: &[GpioBinding { con_id: None, pin: pins::PPS_GPIO }],
    },
    BoardDevice {
        label: "pps-i210",
        node: DeviceNode { compatible: "adlink-pps-i210", properties: &[] },
        lines: &[GpioBinding { con_id: Some("pps-in"), pin: pins::PPS_IN }],
    },
    BoardDevice {
        label: "pps-mcu",
        node: DeviceNode { compatible: "adlink-pps-mcu", properties: &[] },
        lines: &[GpioBinding { con_id: Some("pps-mcu"), pin: pins::PPS_MCU }],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceDescription, SourceKind};

    #[test]
    fn test_offset_update() {
        let config = TimeConfig::new(60);
        assert_eq!(config.offset_minutes(), 60);

        config.set_offset_minutes(-300);
        assert_eq!(config.offset_minutes(), -300);
    }

    #[test]
    fn test_board_devices_are_all_known_kinds() {
        for dev in BOARD_DEVICES {
            let kind = SourceKind::from_compatible(dev.node.compatible())
                .unwrap_or_else(|| panic!("{} has unknown compatible", dev.label));
            assert!(dev.pin(kind.con_id()).is_some(), "{} has no pin for its line", dev.label);
        }
    }

    #[test]
    fn test_board_pin_lookup() {
        let fsync = BOARD_DEVICES.iter().find(|d| d.label == "fsync").unwrap();
        assert_eq!(fsync.pin(Some("dser")), Some(pins::DSER));
        assert_eq!(fsync.pin(None), None);
    }
}
