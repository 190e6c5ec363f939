//! High-resolution duration value with a distinguished NaN: the single type
//! all drift-correction math is written in.
//!
//! An [`Extent`] is a signed count of nanosecond ticks. Tick arithmetic is
//! authoritative for `+`, `-`, `%` and the `Extent / Extent` ratio; seconds
//! arithmetic is used for the scalar `*` and `/` operators. NaN is absorbing
//! through every operator and unordered under every comparison.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Ticks per second (1 tick = 1 ns).
pub const TICKS_PER_SECOND: i64 = 1_000_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 1_000_000;

/// Sentinel tick value representing NaN.
///
/// Mirrors the platform convention of mapping NaN to the duration type's
/// minimum value, which is why [`Extent::MIN`] starts one tick above it.
const NAN_TICKS: i64 = i64::MIN;

/// A nullable, high-resolution duration.
///
/// Three observable states: a finite signed tick count, the saturation bounds
/// [`Extent::MIN`] / [`Extent::MAX`] (standing in for the infinities), and
/// [`Extent::NAN`]. Immutable and `Copy`; all operators return a new value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extent {
    ticks: i64,
}

static_assertions::assert_eq_size!(Extent, u64);
static_assertions::assert_impl_all!(Extent: Copy, Send, Sync);

impl Extent {
    /// The zero duration.
    pub const ZERO: Self = Self { ticks: 0 };

    /// Exactly one second.
    pub const ONE: Self = Self {
        ticks: TICKS_PER_SECOND,
    };

    /// The not-a-duration value. Absorbing under arithmetic, unordered
    /// under comparison.
    pub const NAN: Self = Self { ticks: NAN_TICKS };

    /// Most negative representable duration.
    pub const MIN: Self = Self {
        ticks: i64::MIN + 1,
    };

    /// Most positive representable duration.
    pub const MAX: Self = Self { ticks: i64::MAX };

    // ─── Construction ───────────────────────────────────────────────

    /// Build from a raw tick count. `i64::MIN` is reserved for NaN and is
    /// clamped up to [`Extent::MIN`].
    #[inline]
    pub const fn from_ticks(ticks: i64) -> Self {
        if ticks == NAN_TICKS {
            Self::MIN
        } else {
            Self { ticks }
        }
    }

    /// Build from fractional seconds. A non-finite input yields NaN;
    /// values beyond the representable range saturate.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() {
            return Self::NAN;
        }
        Self::from_f64_ticks(secs * TICKS_PER_SECOND as f64)
    }

    /// Build from fractional milliseconds. Same edge behaviour as
    /// [`Extent::from_secs_f64`].
    #[inline]
    pub fn from_millis_f64(millis: f64) -> Self {
        if !millis.is_finite() {
            return Self::NAN;
        }
        Self::from_f64_ticks(millis * TICKS_PER_MILLISECOND as f64)
    }

    /// Build the period of a frequency: `1 / cps` seconds.
    ///
    /// Zero or non-finite cycles-per-second yields NaN.
    #[inline]
    pub fn from_hertz(cps: f64) -> Self {
        Self::from_secs_f64(1.0 / cps)
    }

    /// Wall time elapsed since `ts` on the monotonic clock.
    #[inline]
    pub fn since(ts: Timestamp) -> Self {
        ts.elapsed()
    }

    fn from_f64_ticks(ticks: f64) -> Self {
        // f64 comparison against i64::MAX is exact enough here: anything at
        // or above the bound saturates.
        if ticks >= i64::MAX as f64 {
            Self::MAX
        } else if ticks <= (i64::MIN + 1) as f64 {
            Self::MIN
        } else {
            Self::from_ticks(ticks.round() as i64)
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Raw tick count. NaN reports `i64::MIN`.
    #[inline]
    pub const fn as_ticks(self) -> i64 {
        self.ticks
    }

    /// Duration in fractional seconds; NaN maps to `f64::NAN`.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        if self.is_nan() {
            f64::NAN
        } else {
            self.ticks as f64 / TICKS_PER_SECOND as f64
        }
    }

    /// Duration in fractional milliseconds; NaN maps to `f64::NAN`.
    #[inline]
    pub fn as_millis_f64(self) -> f64 {
        if self.is_nan() {
            f64::NAN
        } else {
            self.ticks as f64 / TICKS_PER_MILLISECOND as f64
        }
    }

    /// True for the NaN value.
    #[inline]
    pub const fn is_nan(self) -> bool {
        self.ticks == NAN_TICKS
    }

    /// True for finite, non-NaN values above zero.
    #[inline]
    pub const fn is_positive(self) -> bool {
        !self.is_nan() && self.ticks > 0
    }

    /// Convert to the platform duration type. Negative values and NaN clamp
    /// to `Duration::ZERO` (the platform sentinel for "no time").
    #[inline]
    pub fn as_duration(self) -> Duration {
        if self.is_nan() || self.ticks <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.ticks as u64)
        }
    }

    /// The smaller of two extents; NaN loses against any finite value.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        if self.is_nan() {
            other
        } else if other.is_nan() || self.ticks <= other.ticks {
            self
        } else {
            other
        }
    }

    fn saturate(ticks: i128) -> Self {
        if ticks > i64::MAX as i128 {
            Self::MAX
        } else if ticks < (i64::MIN + 1) as i128 {
            Self::MIN
        } else {
            Self { ticks: ticks as i64 }
        }
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<Duration> for Extent {
    fn from(d: Duration) -> Self {
        Self::saturate(d.as_nanos() as i128)
    }
}

// ─── Arithmetic ─────────────────────────────────────────────────────
//
// Every binary operator short-circuits to NaN when either operand is NaN;
// tick overflow saturates to MIN/MAX.

impl Add for Extent {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.is_nan() || rhs.is_nan() {
            return Self::NAN;
        }
        Self::saturate(self.ticks as i128 + rhs.ticks as i128)
    }
}

impl Sub for Extent {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if self.is_nan() || rhs.is_nan() {
            return Self::NAN;
        }
        Self::saturate(self.ticks as i128 - rhs.ticks as i128)
    }
}

impl Rem for Extent {
    type Output = Self;

    /// Sign-preserving remainder over tick counts. A zero divisor yields NaN.
    fn rem(self, rhs: Self) -> Self {
        if self.is_nan() || rhs.is_nan() || rhs.ticks == 0 {
            return Self::NAN;
        }
        Self::from_ticks(self.ticks % rhs.ticks)
    }
}

impl Div for Extent {
    type Output = f64;

    /// Dimensionless ratio of two extents.
    fn div(self, rhs: Self) -> f64 {
        if self.is_nan() || rhs.is_nan() {
            return f64::NAN;
        }
        self.ticks as f64 / rhs.ticks as f64
    }
}

impl Neg for Extent {
    type Output = Self;

    fn neg(self) -> Self {
        if self.is_nan() {
            return Self::NAN;
        }
        Self::saturate(-(self.ticks as i128))
    }
}

impl Mul<f64> for Extent {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        if self.is_nan() {
            return Self::NAN;
        }
        Self::from_secs_f64(self.as_secs_f64() * rhs)
    }
}

impl Div<f64> for Extent {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        if self.is_nan() {
            return Self::NAN;
        }
        Self::from_secs_f64(self.as_secs_f64() / rhs)
    }
}

// Mixed operands: a bare f64 is interpreted as seconds.

impl Add<f64> for Extent {
    type Output = Self;

    fn add(self, rhs: f64) -> Self {
        self + Self::from_secs_f64(rhs)
    }
}

impl Sub<f64> for Extent {
    type Output = Self;

    fn sub(self, rhs: f64) -> Self {
        self - Self::from_secs_f64(rhs)
    }
}

impl Add<Extent> for f64 {
    type Output = Extent;

    fn add(self, rhs: Extent) -> Extent {
        Extent::from_secs_f64(self) + rhs
    }
}

impl Sub<Extent> for f64 {
    type Output = Extent;

    fn sub(self, rhs: Extent) -> Extent {
        Extent::from_secs_f64(self) - rhs
    }
}

impl Mul<Extent> for f64 {
    type Output = Extent;

    fn mul(self, rhs: Extent) -> Extent {
        rhs * self
    }
}

// ─── Comparison ─────────────────────────────────────────────────────

impl PartialEq for Extent {
    /// NaN is not equal to anything, including itself.
    fn eq(&self, other: &Self) -> bool {
        !self.is_nan() && !other.is_nan() && self.ticks == other.ticks
    }
}

impl PartialOrd for Extent {
    /// NaN is unordered: every relational operator returns false against it.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.is_nan() || other.is_nan() {
            None
        } else {
            Some(self.ticks.cmp(&other.ticks))
        }
    }
}

impl fmt::Display for Extent {
    /// Seconds with four decimal places; NaN prints the usual token.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            write!(f, "NaN")
        } else {
            write!(f, "{:.4}", self.as_secs_f64())
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
