//! Wire datetime representation.
//!
//! The protocol encodes a time point as a signed 64-bit count of microseconds
//! since 0001-01-01T00:00:00 UTC. Internally values are anchored at
//! 1400-01-01T00:00:00 UTC and shifted by a fixed offset when crossing the
//! wire, so every representable moment serializes as a non-negative number.
//! The transform must be preserved bit-for-bit for cross-language
//! compatibility.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds between 0001-01-01 and 1400-01-01 (the wire offset).
pub const WIRE_OFFSET_MICROS: i64 = 44_148_153_600_000_000;

/// Seconds between 1400-01-01 and 1970-01-01.
const EPOCH_TO_UNIX_SECS: i64 = 17_987_443_200;

/// A UTC time point with microsecond resolution.
///
/// Stored as microseconds since 1400-01-01T00:00:00 UTC; negative values
/// reach back before the anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    micros: i64,
}

impl DateTime {
    /// Build from microseconds since 1400-01-01T00:00:00 UTC.
    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Microseconds since 1400-01-01T00:00:00 UTC.
    pub const fn micros(self) -> i64 {
        self.micros
    }

    /// The wire form: microseconds since year 1.
    pub const fn to_wire(self) -> i64 {
        self.micros + WIRE_OFFSET_MICROS
    }

    /// Decode the wire form.
    pub const fn from_wire(raw: i64) -> Self {
        Self { micros: raw - WIRE_OFFSET_MICROS }
    }

    /// Build from microseconds since the Unix epoch.
    pub const fn from_unix_micros(unix_micros: i64) -> Self {
        Self { micros: unix_micros + EPOCH_TO_UNIX_SECS * 1_000_000 }
    }

    /// Microseconds since the Unix epoch (negative before 1970).
    pub const fn to_unix_micros(self) -> i64 {
        self.micros - EPOCH_TO_UNIX_SECS * 1_000_000
    }

    /// The current wall-clock time, truncated to microseconds.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

impl From<SystemTime> for DateTime {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(after) => Self::from_unix_micros(after.as_micros() as i64),
            Err(before) => Self::from_unix_micros(-(before.duration().as_micros() as i64)),
        }
    }
}

impl From<DateTime> for SystemTime {
    fn from(t: DateTime) -> Self {
        let unix = t.to_unix_micros();
        if unix >= 0 {
            UNIX_EPOCH + Duration::from_micros(unix as u64)
        } else {
            UNIX_EPOCH - Duration::from_micros(unix.unsigned_abs())
        }
    }
}
