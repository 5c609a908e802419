//! Device descriptions and the source-kind match table.
//!
//! A description is whatever the board provides for one interrupt source
//! (device-tree node, static board table, test fixture). The core only asks
//! it three things: which driver it is for, boolean properties, and string
//! properties.

use crate::decode::Precision;
use crate::irq::Flags;

/// `assert-falling-edge`: trigger on the falling edge instead of rising.
pub const PROP_ASSERT_FALLING_EDGE: &str = "assert-falling-edge";

/// `base-gpio`: the edge is detected by the upstream I/O expander.
pub const PROP_BASE_GPIO: &str = "base-gpio";

/// `interrupt`: human-readable name of a base interrupt line.
pub const PROP_INTERRUPT: &str = "interrupt";

/// Property lookup for one device.
pub trait DeviceDescription {
    /// Driver match string.
    fn compatible(&self) -> &str;

    /// Boolean property; absent means `false`.
    fn property_bool(&self, name: &str) -> bool;

    /// String property.
    fn property_str(&self, name: &str) -> Option<&str>;
}

/// Property value in a [`DeviceNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyValue<'a> {
    /// Present, no value (boolean true).
    Flag,
    Str(&'a str),
}

/// One named property.
#[derive(Clone, Copy, Debug)]
pub struct Property<'a> {
    pub name: &'a str,
    pub value: PropertyValue<'a>,
}

impl<'a> Property<'a> {
    pub const fn flag(name: &'a str) -> Self {
        Self { name, value: PropertyValue::Flag }
    }

    pub const fn string(name: &'a str, value: &'a str) -> Self {
        Self { name, value: PropertyValue::Str(value) }
    }
}

/// In-memory device description (board tables, tests).
#[derive(Clone, Copy, Debug)]
pub struct DeviceNode<'a> {
    pub compatible: &'a str,
    pub properties: &'a [Property<'a>],
}

impl<'a> DeviceNode<'a> {
    pub const fn new(compatible: &'a str, properties: &'a [Property<'a>]) -> Self {
        Self { compatible, properties }
    }

    fn find(&self, name: &str) -> Option<&Property<'a>> {
        self.properties.iter().find(|p| p.name == name)
    }
}

impl DeviceDescription for DeviceNode<'_> {
    fn compatible(&self) -> &str {
        self.compatible
    }

    fn property_bool(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn property_str(&self, name: &str) -> Option<&str> {
        match self.find(name)?.value {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::Flag => None,
        }
    }
}

/// How a kind learns whether its edge is pre-consumed upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upstream {
    /// No upstream chip; always a local edge.
    Never,
    /// Read from the `base-gpio` property.
    Property,
    /// Always behind the expander; never has a fast path.
    Always,
}

/// What the fast path snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureLayout {
    /// Nothing; the kind has no fast path.
    None,
    /// Wall-clock seconds.
    RealSeconds,
    /// Wall-clock seconds plus wall-clock nanoseconds.
    RealSecondsAndNanos,
}

/// The interrupt source families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// General base interrupt behind the I/O expander.
    Base,
    /// FPGA frame-sync feedback.
    FrameSync,
    /// PPS on a plain GPIO.
    PpsGpio,
    /// PPS from the dedicated network controller.
    PpsI210,
    /// PPS relayed by the auxiliary microcontroller.
    PpsMcu,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Base,
        SourceKind::FrameSync,
        SourceKind::PpsGpio,
        SourceKind::PpsI210,
        SourceKind::PpsMcu,
    ];

    /// Driver name, also the `compatible` match string.
    pub const fn driver_name(self) -> &'static str {
        match self {
            SourceKind::Base => "adlink-base-gpio",
            SourceKind::FrameSync => "adlink-fsync-gpio",
            SourceKind::PpsGpio => "adlink-pps-gpio",
            SourceKind::PpsI210 => "adlink-pps-i210",
            SourceKind::PpsMcu => "adlink-pps-mcu",
        }
    }

    /// Match a description's `compatible` string.
    pub fn from_compatible(compatible: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.driver_name() == compatible)
    }

    /// GPIO connection id (`<con_id>-gpios`).
    pub const fn con_id(self) -> Option<&'static str> {
        match self {
            SourceKind::Base => Some("interrupt"),
            SourceKind::FrameSync => Some("dser"),
            SourceKind::PpsGpio => None,
            SourceKind::PpsI210 => Some("pps-in"),
            SourceKind::PpsMcu => Some("pps-mcu"),
        }
    }

    /// Line name used in messages.
    pub const fn line_label(self) -> &'static str {
        match self {
            SourceKind::Base => "interrupt-gpios",
            SourceKind::FrameSync => "dser-gpios",
            SourceKind::PpsGpio => "PPS GPIO",
            SourceKind::PpsI210 => "pps-in-gpios",
            SourceKind::PpsMcu => "pps-mcu-gpios",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            SourceKind::Base => "base gpios",
            SourceKind::FrameSync => "FPGA frame-sync feedback",
            SourceKind::PpsGpio => "FPGA PPS through GPIO pin",
            SourceKind::PpsI210 => "PPS from i210 controller",
            SourceKind::PpsMcu => "PPS relayed by MCU",
        }
    }

    /// Whether `assert-falling-edge` is honoured.
    pub const fn reads_polarity(self) -> bool {
        !matches!(self, SourceKind::Base)
    }

    pub const fn upstream(self) -> Upstream {
        match self {
            SourceKind::Base => Upstream::Always,
            SourceKind::FrameSync | SourceKind::PpsGpio => Upstream::Property,
            SourceKind::PpsI210 | SourceKind::PpsMcu => Upstream::Never,
        }
    }

    pub const fn capture(self) -> CaptureLayout {
        match self {
            SourceKind::Base => CaptureLayout::None,
            SourceKind::FrameSync | SourceKind::PpsGpio | SourceKind::PpsI210 => {
                CaptureLayout::RealSecondsAndNanos
            }
            SourceKind::PpsMcu => CaptureLayout::RealSeconds,
        }
    }

    /// Sub-second digits in the report.
    pub const fn precision(self) -> Precision {
        match self {
            SourceKind::Base | SourceKind::PpsMcu => Precision::Seconds,
            SourceKind::FrameSync => Precision::Millis,
            SourceKind::PpsGpio | SourceKind::PpsI210 => Precision::Nanos,
        }
    }

    /// Registration flags beyond the trigger edge.
    pub const fn extra_flags(self) -> Flags {
        match self {
            SourceKind::Base => Flags::ONESHOT,
            _ => Flags::empty(),
        }
    }

    /// True if the fast path finishes the edge itself (log line only) and
    /// never wakes the deferred stage.
    pub const fn fast_path_only(self) -> bool {
        matches!(self, SourceKind::PpsGpio)
    }
}
