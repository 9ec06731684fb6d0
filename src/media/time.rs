//! Rational media time
//!
//! Timestamps are `value / timescale` seconds. Arithmetic between different
//! timescales moves both operands onto a common scale first (their least
//! common multiple when it fits, otherwise the finer of the two with rounding).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Nanosecond timescale used by capture clocks
pub const NANOS_PER_SECOND: i32 = 1_000_000_000;

/// A rational time value
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMediaTime")]
pub struct MediaTime {
    /// Tick count
    value: i64,

    /// Ticks per second, always positive
    timescale: i32,
}

/// Wire form of `MediaTime`, checked before use
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMediaTime {
    value: i64,
    timescale: i32,
}

impl TryFrom<RawMediaTime> for MediaTime {
    type Error = String;

    fn try_from(raw: RawMediaTime) -> Result<Self, Self::Error> {
        Self::checked(raw.value, raw.timescale)
            .ok_or_else(|| format!("timescale must be positive, got {}", raw.timescale))
    }
}

impl MediaTime {
    /// Zero seconds
    pub const ZERO: MediaTime = MediaTime { value: 0, timescale: 1 };

    /// Create a time of `value` ticks at `timescale` ticks per second.
    ///
    /// A non-positive timescale is treated as 1.
    pub fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Like `new`, but `None` for a non-positive timescale
    pub fn checked(value: i64, timescale: i32) -> Option<Self> {
        (timescale > 0).then_some(Self { value, timescale })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn timescale(&self) -> i32 {
        self.timescale
    }

    /// Whole seconds
    pub fn from_secs(secs: i64) -> Self {
        Self::new(secs, 1)
    }

    /// Milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Self::new(millis, 1_000)
    }

    /// Nanoseconds
    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(nanos, NANOS_PER_SECOND)
    }

    /// Fractional seconds, stored at nanosecond precision
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos((secs * NANOS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Re-express at another timescale, rounding half away from zero
    pub fn convert_scale(&self, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = self.value as i128 * timescale as i128;
        let divisor = self.timescale as i128;
        let half = divisor / 2;
        let rounded = if scaled >= 0 {
            (scaled + half) / divisor
        } else {
            (scaled - half) / divisor
        };
        Self::new(clamp_i64(rounded), timescale)
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Ratio of this time to `total`, clamped to `0.0..=1.0`
    pub fn fraction_of(&self, total: MediaTime) -> f64 {
        let total = total.as_secs_f64();
        if total <= 0.0 {
            return 1.0;
        }
        (self.as_secs_f64() / total).clamp(0.0, 1.0)
    }

    fn common_scale(a: i32, b: i32) -> i32 {
        if a == b {
            return a;
        }
        let lcm = (a as i64 / gcd(a as i64, b as i64)) * b as i64;
        if lcm <= i32::MAX as i64 {
            lcm as i32
        } else {
            a.max(b)
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let scale = Self::common_scale(self.timescale, rhs.timescale);
        let a = self.convert_scale(scale);
        let b = rhs.convert_scale(scale);
        MediaTime::new(a.value.saturating_add(b.value), scale)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        let scale = Self::common_scale(self.timescale, rhs.timescale);
        let a = self.convert_scale(scale);
        let b = rhs.convert_scale(scale);
        MediaTime::new(a.value.saturating_sub(b.value), scale)
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
