//! Server-relative time values.
//!
//! The instrumented process reports every instant as a `(seconds, nanos)`
//! pair. [`Timestamp`] and [`Duration`] keep that representation instead of
//! converting to `std::time` types, because:
//!
//! - durations computed from skewed server clocks can go negative, and
//! - all "so far" math must be driven by the server's own notion of now
//!   ([`ServerClock`]), never by the local wall clock.
//!
//! Both types normalize on every construction and every arithmetic op so
//! that the sub-second component is always in `[0, 1e9)`. Ordering compares
//! seconds first, then nanos.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// Un-normalized `(seconds, nanos)` pair as it appears on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RawTime {
    #[serde(default)]
    seconds: i64,
    #[serde(default)]
    nanos: i64,
}

/// Carry/borrow `nanos` into `seconds` so that `0 <= nanos < 1e9`.
fn normalize(seconds: i64, nanos: i64) -> (i64, u32) {
    let carry = nanos.div_euclid(NANOS_PER_SEC);
    let nanos = nanos.rem_euclid(NANOS_PER_SEC);
    (seconds.saturating_add(carry), nanos as u32)
}

// =============================================================================
// Duration
// =============================================================================

/// A signed span of time with nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawTime", into = "RawTime")]
pub struct Duration {
    seconds: i64,
    nanos: u32,
}

/// Coarse magnitude bucket of a [`Duration`], used to pick a display style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl Duration {
    pub const ZERO: Self = Self {
        seconds: 0,
        nanos: 0,
    };

    /// Build a duration, carrying or borrowing out-of-range `nanos`.
    #[must_use]
    pub fn new(seconds: i64, nanos: i64) -> Self {
        let (seconds, nanos) = normalize(seconds, nanos);
        Self { seconds, nanos }
    }

    #[must_use]
    pub const fn from_secs(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self::new(millis.div_euclid(1_000), millis.rem_euclid(1_000) * 1_000_000)
    }

    /// Build from an unsigned nanosecond count (histogram values).
    #[must_use]
    pub fn from_nanos(nanos: u64) -> Self {
        let per_sec = NANOS_PER_SEC as u64;
        Self {
            seconds: (nanos / per_sec) as i64,
            nanos: (nanos % per_sec) as u32,
        }
    }

    /// Whole seconds, rounded towards negative infinity.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second component, always in `[0, 1e9)`.
    #[must_use]
    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.seconds < 0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + f64::from(self.nanos) / 1e9
    }

    #[must_use]
    pub fn as_millis_f64(&self) -> f64 {
        self.seconds as f64 * 1e3 + f64::from(self.nanos) / 1e6
    }

    #[must_use]
    pub fn as_micros_f64(&self) -> f64 {
        self.seconds as f64 * 1e6 + f64::from(self.nanos) / 1e3
    }

    /// Subtract, clamping at zero instead of going negative.
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        let diff = self - rhs;
        if diff.is_negative() { Self::ZERO } else { diff }
    }

    /// Largest unit that is at least one whole step.
    #[must_use]
    pub fn magnitude(&self) -> Magnitude {
        let secs = self.seconds;
        if secs >= SECS_PER_DAY {
            Magnitude::Days
        } else if secs >= SECS_PER_HOUR {
            Magnitude::Hours
        } else if secs >= SECS_PER_MINUTE {
            Magnitude::Minutes
        } else if secs >= 1 {
            Magnitude::Seconds
        } else if self.as_millis_f64() >= 1.0 {
            Magnitude::Millis
        } else {
            Magnitude::Micros
        }
    }
}

impl From<RawTime> for Duration {
    fn from(raw: RawTime) -> Self {
        Self::new(raw.seconds, raw.nanos)
    }
}

impl From<Duration> for RawTime {
    fn from(d: Duration) -> Self {
        Self {
            seconds: d.seconds,
            nanos: i64::from(d.nanos),
        }
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self {
            seconds: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            nanos: d.subsec_nanos(),
        }
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.seconds.saturating_add(rhs.seconds),
            i64::from(self.nanos) + i64::from(rhs.nanos),
        )
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.seconds.saturating_sub(rhs.seconds),
            i64::from(self.nanos) - i64::from(rhs.nanos),
        )
    }
}

impl fmt::Display for Duration {
    /// Durations of a minute or more show the two most significant non-zero
    /// units (`"1h 1m "`); shorter ones show only the most significant unit
    /// (`"500ms"`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            f.write_str("-")?;
            return fmt::Display::fmt(&(Self::ZERO - *self), f);
        }

        let secs = self.seconds;
        let nanos = i64::from(self.nanos);
        let units = [
            (secs / SECS_PER_DAY, "d"),
            ((secs / SECS_PER_HOUR) % 24, "h"),
            ((secs / SECS_PER_MINUTE) % 60, "m"),
            (secs % 60, "s"),
            (nanos / 1_000_000, "ms"),
            ((nanos / 1_000) % 1_000, "µs"),
            (nanos % 1_000, "ns"),
        ];

        let mut nonzero = units.iter().filter(|(value, _)| *value > 0);
        if secs >= SECS_PER_MINUTE {
            for (value, unit) in nonzero.take(2) {
                write!(f, "{value}{unit} ")?;
            }
            Ok(())
        } else if let Some((value, unit)) = nonzero.next() {
            write!(f, "{value}{unit}")
        } else {
            f.write_str("0ns")
        }
    }
}

// =============================================================================
// Timestamp
// =============================================================================

/// An instant on the instrumented process's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawTime", into = "RawTime")]
pub struct Timestamp {
    seconds: i64,
    nanos: u32,
}

impl Timestamp {
    pub const EPOCH: Self = Self {
        seconds: 0,
        nanos: 0,
    };

    #[must_use]
    pub fn new(seconds: i64, nanos: i64) -> Self {
        let (seconds, nanos) = normalize(seconds, nanos);
        Self { seconds, nanos }
    }

    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    #[must_use]
    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// Time elapsed from `earlier` to `self`; negative if `earlier` is later.
    #[must_use]
    pub fn since(self, earlier: Self) -> Duration {
        Duration::new(
            self.seconds.saturating_sub(earlier.seconds),
            i64::from(self.nanos) - i64::from(earlier.nanos),
        )
    }
}

impl From<RawTime> for Timestamp {
    fn from(raw: RawTime) -> Self {
        Self::new(raw.seconds, raw.nanos)
    }
}

impl From<Timestamp> for RawTime {
    fn from(t: Timestamp) -> Self {
        Self {
            seconds: t.seconds,
            nanos: i64::from(t.nanos),
        }
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.since(rhs)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self::new(
            self.seconds.saturating_add(rhs.seconds()),
            i64::from(self.nanos) + i64::from(rhs.subsec_nanos()),
        )
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        Self::new(
            self.seconds.saturating_sub(rhs.seconds()),
            i64::from(self.nanos) - i64::from(rhs.subsec_nanos()),
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

// =============================================================================
// Server clock
// =============================================================================

/// The "live now" source: the latest timestamp reported by the server.
///
/// Unknown until the first update carrying a timestamp arrives. Never moves
/// backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerClock {
    last: Option<Timestamp>,
}

impl ServerClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Record a server-reported instant. Returns `true` if the clock moved.
    pub fn observe(&mut self, now: Timestamp) -> bool {
        match self.last {
            Some(last) if now <= last => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Last observed server time, if any.
    #[must_use]
    pub const fn now(&self) -> Option<Timestamp> {
        self.last
    }
}
