//! Platform timer service: minimum period query, process-wide timer-rate
//! raising, and one-shot high-resolution wakes.
//!
//! On Linux the "raised period" is implemented with `prctl(PR_SET_TIMERSLACK)`
//! (the per-process sleep slack that hrtimers apply to non-RT tasks) and the
//! one-shot wake with a `timerfd` on `CLOCK_MONOTONIC`. Failing to raise the
//! slack is non-fatal; failing to create or arm the timerfd is fatal to the
//! enclosing delay call only.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use nix::time::{ClockId as TimeClockId, clock_getres};
use tracing::trace;

use metron_common::extent::{Extent, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};

use crate::error::PlatformError;

/// Best one-shot period the platform will guarantee, never below 1 ms.
///
/// Computed once from `clock_getres(CLOCK_MONOTONIC)`; the reported
/// resolution is far finer than what a non-RT kernel actually delivers for a
/// sleep, so the floor carries the real contract.
pub fn min_period() -> Extent {
    static MIN_PERIOD_TICKS: OnceLock<i64> = OnceLock::new();
    let ticks = *MIN_PERIOD_TICKS.get_or_init(|| {
        let resolution = clock_getres(TimeClockId::CLOCK_MONOTONIC)
            .map(|ts| ts.tv_sec() * TICKS_PER_SECOND + ts.tv_nsec())
            .unwrap_or(TICKS_PER_MILLISECOND);
        resolution.max(TICKS_PER_MILLISECOND)
    });
    Extent::from_ticks(ticks)
}

// ─── Period raising ─────────────────────────────────────────────────

/// Timer slack requested while any delay is in flight [ns].
const RAISED_SLACK_NS: u64 = 1_000;

/// Kernel default timer slack, used when the previous value cannot be read.
const DEFAULT_SLACK_NS: u64 = 50_000;

/// Process-global acquisition depth. The slack is raised on 0→1 and restored
/// on 1→0, so nested delays stay balanced.
static PERIOD_DEPTH: AtomicU32 = AtomicU32::new(0);

/// Slack value to restore when the last guard drops.
static SAVED_SLACK_NS: AtomicU64 = AtomicU64::new(DEFAULT_SLACK_NS);

/// Scoped, process-global raised timer rate.
///
/// Acquisition and release are strictly paired through `Drop`, including on
/// early returns and error paths.
#[derive(Debug)]
pub struct PeriodGuard {
    _priv: (),
}

impl PeriodGuard {
    /// Raise the process timer rate for the lifetime of the guard.
    ///
    /// Never fails: if the kernel refuses, delays simply run with the
    /// default sleep accuracy.
    pub fn acquire() -> Self {
        if PERIOD_DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
            let prev = unsafe { libc::prctl(libc::PR_GET_TIMERSLACK, 0, 0, 0, 0) };
            let saved = if prev > 0 { prev as u64 } else { DEFAULT_SLACK_NS };
            SAVED_SLACK_NS.store(saved, Ordering::SeqCst);
            let rc = unsafe {
                libc::prctl(
                    libc::PR_SET_TIMERSLACK,
                    RAISED_SLACK_NS as libc::c_ulong,
                    0,
                    0,
                    0,
                )
            };
            if rc != 0 {
                trace!("PR_SET_TIMERSLACK refused; delay falls back to default sleep accuracy");
            }
        }
        Self { _priv: () }
    }

    #[cfg(test)]
    pub(crate) fn depth() -> u32 {
        PERIOD_DEPTH.load(Ordering::SeqCst)
    }
}

impl Drop for PeriodGuard {
    fn drop(&mut self) {
        if PERIOD_DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
            let saved = SAVED_SLACK_NS.load(Ordering::SeqCst);
            let rc = unsafe {
                libc::prctl(libc::PR_SET_TIMERSLACK, saved as libc::c_ulong, 0, 0, 0)
            };
            if rc != 0 {
                trace!("PR_SET_TIMERSLACK restore refused");
            }
        }
    }
}

// ─── One-shot wake ──────────────────────────────────────────────────

/// A single-fire high-resolution timer on `CLOCK_MONOTONIC`.
///
/// One instance is created per delay call and re-armed for each sleep chunk.
/// Creation failing (fd exhaustion and the like) plays the role of the
/// platform returning an invalid scheduling id: fatal to the enclosing call.
#[derive(Debug)]
pub struct OneShotTimer {
    fd: TimerFd,
}

impl OneShotTimer {
    pub fn new() -> Result<Self, PlatformError> {
        let fd = TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::empty())
            .map_err(|e| PlatformError::from_errno("timerfd_create", e))?;
        Ok(Self { fd })
    }

    /// Schedule a single expiry `dur` from now.
    ///
    /// Non-positive durations arm for one nanosecond: a zero `it_value`
    /// would disarm the timer instead of firing it.
    pub fn arm(&self, dur: Extent) -> Result<(), PlatformError> {
        let dur = if dur.is_positive() {
            dur.as_duration()
        } else {
            Duration::from_nanos(1)
        };
        self.fd
            .set(
                Expiration::OneShot(TimeSpec::from(dur)),
                TimerSetTimeFlags::empty(),
            )
            .map_err(|e| PlatformError::from_errno("timerfd_settime", e))
    }

    /// Block until the armed expiry fires.
    pub fn wait(&self) -> Result<(), PlatformError> {
        self.fd
            .wait()
            .map_err(|e| PlatformError::from_errno("timerfd_read", e))
    }

    /// Cancel a pending expiry. Optional: a one-shot completes on its own.
    pub fn disarm(&self) -> Result<(), PlatformError> {
        self.fd
            .unset()
            .map_err(|e| PlatformError::from_errno("timerfd_disarm", e))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
