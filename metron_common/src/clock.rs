//! Monotonic clock abstraction over `CLOCK_MONOTONIC`.
//!
//! [`Timestamp`] is an opaque nanosecond tick on the platform monotonic
//! clock: non-decreasing, unaffected by wall-clock changes, and good to at
//! least microsecond resolution. [`probe`] verifies both properties once at
//! startup so the hot-path [`Timestamp::now`] can stay infallible.

use nix::time::{ClockId, clock_getres, clock_gettime};
use thiserror::Error;

use crate::extent::{Extent, TICKS_PER_SECOND};

/// Worst acceptable clock resolution [ns]. The loop math needs ~1 µs.
const MAX_RESOLUTION_NS: i64 = 1_000;

/// Errors raised while probing the platform clock source.
#[derive(Debug, Clone, Error)]
pub enum ClockError {
    /// `clock_gettime(CLOCK_MONOTONIC)` is not usable on this platform.
    #[error("monotonic clock unavailable: errno {errno}")]
    Unavailable {
        /// OS error code.
        errno: i32,
    },

    /// The clock exists but its resolution is too coarse for sub-millisecond
    /// scheduling.
    #[error("monotonic clock resolution too coarse: {resolution_ns}ns > {MAX_RESOLUTION_NS}ns")]
    CoarseResolution {
        /// Reported resolution [ns].
        resolution_ns: i64,
    },
}

/// Verify the monotonic clock is present and fine-grained enough.
///
/// Called once when a loop driver starts; the rest of the crate reads the
/// clock through the infallible [`Timestamp::now`].
pub fn probe() -> Result<(), ClockError> {
    clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(|e| ClockError::Unavailable {
        errno: e as i32,
    })?;
    let res = clock_getres(ClockId::CLOCK_MONOTONIC).map_err(|e| ClockError::Unavailable {
        errno: e as i32,
    })?;
    let resolution_ns = res.tv_sec() * TICKS_PER_SECOND + res.tv_nsec();
    if resolution_ns > MAX_RESOLUTION_NS {
        return Err(ClockError::CoarseResolution { resolution_ns });
    }
    Ok(())
}

/// An opaque monotonic tick (nanoseconds on `CLOCK_MONOTONIC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    ticks: i64,
}

static_assertions::assert_eq_size!(Timestamp, u64);

impl Timestamp {
    /// Read the monotonic clock.
    ///
    /// # Panics
    ///
    /// Panics if `CLOCK_MONOTONIC` cannot be read. [`probe`] at startup makes
    /// this unreachable on any supported platform; a missing monotonic source
    /// is unrecoverable for this crate by design.
    #[inline]
    pub fn now() -> Self {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).expect("CLOCK_MONOTONIC unavailable");
        Self {
            ticks: ts.tv_sec() * TICKS_PER_SECOND + ts.tv_nsec(),
        }
    }

    /// Wall time elapsed since this timestamp.
    #[inline]
    pub fn elapsed(self) -> Extent {
        Self::now() - self
    }

    /// Rebuild a timestamp from its raw tick count.
    ///
    /// Intended for deterministic tests that drive the loop state with
    /// synthetic time; production code always starts from [`Timestamp::now`].
    #[inline]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// Raw tick count on the monotonic timeline.
    #[inline]
    pub const fn as_ticks(self) -> i64 {
        self.ticks
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Extent;

    /// Signed distance between two monotonic ticks.
    fn sub(self, rhs: Self) -> Extent {
        Extent::from_ticks(self.ticks.saturating_sub(rhs.ticks))
    }
}

impl std::ops::Add<Extent> for Timestamp {
    type Output = Self;

    /// Advance a timestamp by a finite extent. NaN advances by nothing.
    fn add(self, rhs: Extent) -> Self {
        if rhs.is_nan() {
            return self;
        }
        Self {
            ticks: self.ticks.saturating_add(rhs.as_ticks()),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
