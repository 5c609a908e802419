//! Calendar decoding of captured timestamps and the report record.
//!
//! Pure arithmetic, no hardware. Runs in the deferred context only.
//!
//! # Hour offset
//!
//! The local offset is applied as `offset_minutes / 60` added to the hour
//! field, with no carry into the day and no wrap. 23:00 UTC with a +480 min
//! offset reports hour 31. This is kept exactly as the deployed drivers
//! behave; consumers that want a civil hour must wrap it themselves.

use core::fmt;

use crate::capture::CapturedTimestamp;
use crate::device::{CaptureLayout, SourceKind};
use crate::irq::IrqNumber;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3600;
const HOURS_PER_DAY: i64 = 24;

/// Sub-second digits carried by a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    Seconds,
    Millis,
    Nanos,
}

/// Hour/minute/second split of a second count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDay {
    /// 0-23 before the offset is applied; unbounded after.
    pub hour: i32,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    /// Split whole seconds since the epoch into UTC time of day.
    ///
    /// Euclidean remainders, so pre-epoch values still land in range.
    pub fn from_epoch_seconds(t: i64) -> Self {
        Self {
            hour: t.div_euclid(SECS_PER_HOUR).rem_euclid(HOURS_PER_DAY) as i32,
            minute: t.div_euclid(SECS_PER_MINUTE).rem_euclid(60) as u8,
            second: t.rem_euclid(60) as u8,
        }
    }

    /// Add `offset_minutes / 60` hours. No carry, no wrap.
    pub fn with_offset(self, offset_minutes: i32) -> Self {
        Self {
            hour: self.hour + offset_minutes / 60,
            ..self
        }
    }

    /// Seconds since midnight (only meaningful before the offset).
    pub fn seconds_of_day(&self) -> i64 {
        self.hour as i64 * SECS_PER_HOUR + self.minute as i64 * SECS_PER_MINUTE + self.second as i64
    }
}

/// Reduce a nanosecond count into `0..NANOS_PER_SEC`.
#[inline]
pub fn reduce_nanos(ns: u64) -> u32 {
    (ns % NANOS_PER_SEC) as u32
}

/// One deferred-stage output record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    pub irq: IrqNumber,
    pub source: SourceKind,
    pub hour: i32,
    pub minute: u8,
    pub second: u8,
    /// Reduced sub-second part, present when the kind captures one.
    pub nanosecond: Option<u32>,
    pub precision: Precision,
    /// False when no capture was pending: the time is the latest snapshot
    /// (or zero), not the edge that ran this invocation.
    pub fresh: bool,
    /// Edge index of the capture, if any capture was ever written.
    pub edge: Option<u32>,
}

impl Report {
    /// Decode `capture` for a source of `kind`.
    pub fn decode(
        irq: IrqNumber,
        kind: SourceKind,
        capture: CapturedTimestamp,
        offset_minutes: i32,
        fresh: bool,
        edge: Option<u32>,
    ) -> Self {
        let (seconds, nanos) = match kind.capture() {
            CaptureLayout::None | CaptureLayout::RealSeconds => (capture.seconds, None),
            CaptureLayout::RealSecondsAndNanos => {
                (capture.seconds, Some(reduce_nanos(capture.nanoseconds)))
            }
        };

        let precision = kind.precision();
        let tod = TimeOfDay::from_epoch_seconds(seconds).with_offset(offset_minutes);

        Self {
            irq,
            source: kind,
            hour: tod.hour,
            minute: tod.minute,
            second: tod.second,
            nanosecond: match precision {
                Precision::Seconds => None,
                Precision::Millis | Precision::Nanos => nanos,
            },
            precision,
            fresh,
            edge,
        }
    }
}

impl fmt::Display for Report {
    /// `bottom-irq=<n>, HH:MM:SS[.fff|.nnnnnnnnn][ (stale)]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bottom-irq={}, {:02}:{:02}:{:02}",
            self.irq, self.hour, self.minute, self.second
        )?;
        match (self.precision, self.nanosecond) {
            (Precision::Nanos, Some(ns)) => write!(f, ".{:09}", ns)?,
            (Precision::Millis, Some(ns)) => write!(f, ".{:03}", ns / 1_000_000)?,
            _ => {}
        }
        if !self.fresh {
            f.write_str(" (stale)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(seconds: i64, nanoseconds: u64) -> CapturedTimestamp {
        CapturedTimestamp { seconds, nanoseconds }
    }

    #[test]
    fn test_split_noon() {
        let tod = TimeOfDay::from_epoch_seconds(1_700_000_000 - 1_700_000_000 % 86_400 + 12 * 3600);
        assert_eq!(tod, TimeOfDay { hour: 12, minute: 0, second: 0 });
    }

    #[test]
    fn test_split_is_congruent_mod_day() {
        let samples = [0i64, 1, 59, 60, 3599, 3600, 86_399, 86_400, 1_681_000_123, -1, -86_401, i64::MAX, i64::MIN];
        for t in samples {
            let tod = TimeOfDay::from_epoch_seconds(t);
            assert!((0..24).contains(&tod.hour));
            assert!(tod.minute < 60);
            assert!(tod.second < 60);
            assert_eq!(tod.seconds_of_day(), t.rem_euclid(86_400), "t = {}", t);
        }
    }

    #[test]
    fn test_offset_does_not_carry() {
        let tod = TimeOfDay { hour: 23, minute: 0, second: 0 }.with_offset(8 * 60);
        assert_eq!(tod.hour, 31);
    }

    #[test]
    fn test_offset_truncates_partial_hours() {
        // 330 min = 5h30: only the whole hours reach the hour field
        let tod = TimeOfDay { hour: 1, minute: 10, second: 0 }.with_offset(330);
        assert_eq!(tod.hour, 6);
        assert_eq!(tod.minute, 10);

        let tod = TimeOfDay { hour: 1, minute: 0, second: 0 }.with_offset(-300);
        assert_eq!(tod.hour, -4);
    }

    #[test]
    fn test_reduce_nanos() {
        assert_eq!(reduce_nanos(0), 0);
        assert_eq!(reduce_nanos(999_999_999), 999_999_999);
        assert_eq!(reduce_nanos(1_000_000_000), 0);
        assert_eq!(reduce_nanos(1_681_000_123_123_456_789), 123_456_789);
        assert!(reduce_nanos(u64::MAX) < 1_000_000_000);
    }

    #[test]
    fn test_decode_i210_nanoseconds() {
        // 23:59:59.123456789 on some day
        let secs = 19_000 * 86_400 + 86_399;
        let ns = secs as u64 * NANOS_PER_SEC + 123_456_789;
        let report = Report::decode(IrqNumber(7), SourceKind::PpsI210, capture(secs, ns), 0, true, Some(0));

        assert_eq!((report.hour, report.minute, report.second), (23, 59, 59));
        assert_eq!(report.nanosecond, Some(123_456_789));
        assert_eq!(format!("{}", report), "bottom-irq=7, 23:59:59.123456789");
    }

    #[test]
    fn test_decode_fsync_prints_millis() {
        let secs = 19_000 * 86_400 + 3600 + 61;
        let ns = secs as u64 * NANOS_PER_SEC + 45_600_000;
        let report = Report::decode(IrqNumber(3), SourceKind::FrameSync, capture(secs, ns), 0, true, Some(4));

        assert_eq!(report.nanosecond, Some(45_600_000));
        assert_eq!(format!("{}", report), "bottom-irq=3, 01:01:01.045");
    }

    #[test]
    fn test_decode_mcu_has_no_subsecond() {
        let secs = 19_000 * 86_400 + 12 * 3600;
        let report = Report::decode(IrqNumber(9), SourceKind::PpsMcu, capture(secs, 777), 0, true, Some(0));

        assert_eq!(report.nanosecond, None);
        assert_eq!(format!("{}", report), "bottom-irq=9, 12:00:00");
    }

    #[test]
    fn test_decode_pps_gpio_uses_wall_clock() {
        let secs = 19_000 * 86_400 + 3_723;
        let ns = secs as u64 * NANOS_PER_SEC + 5;
        let report = Report::decode(IrqNumber(1), SourceKind::PpsGpio, capture(secs, ns), 0, true, Some(0));

        assert_eq!((report.hour, report.minute, report.second), (1, 2, 3));
        assert_eq!(report.nanosecond, Some(5));
    }

    #[test]
    fn test_stale_zero_capture() {
        let report = Report::decode(IrqNumber(5), SourceKind::Base, CapturedTimestamp::ZERO, 0, false, None);

        assert_eq!((report.hour, report.minute, report.second), (0, 0, 0));
        assert_eq!(format!("{}", report), "bottom-irq=5, 00:00:00 (stale)");
    }
}
