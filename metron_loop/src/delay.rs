//! Precision delay primitive: interrupt-driven sleep with a bounded
//! spin-wait tail.
//!
//! A monolithic OS sleep overshoots a sub-millisecond target by several
//! hundred microseconds, so [`delay`] composes ≤1 ms one-shot sleeps with a
//! final tight spin whose allowance is set by [`PrecisionOption`]. The 1 ms
//! chunking also keeps the caller responsive to cancellation and lets the OS
//! schedule other work between wakes.
//!
//! Two variants expose the same algorithm: a blocking form for worker
//! threads, and a cooperative form whose 1 ms waits are suspension points.
//! The final spin is synchronous and CPU-bound in both.

use metron_common::clock::Timestamp;
use metron_common::extent::{Extent, TICKS_PER_MILLISECOND};

use crate::cancel::CancelObserver;
use crate::error::PlatformError;
use crate::options::PrecisionOption;
use crate::platform::{OneShotTimer, PeriodGuard, min_period};

/// Upper bound on a single OS sleep inside a delay.
const SLEEP_CHUNK: Extent = Extent::from_ticks(TICKS_PER_MILLISECOND);

#[inline]
fn is_cancelled(cancel: Option<&CancelObserver>) -> bool {
    cancel.is_some_and(CancelObserver::is_cancelled)
}

/// Block the calling thread for `dur`.
///
/// Guarantees the actual elapsed time is `>= dur` unless `cancel` fires
/// first or `dur` is non-positive or NaN (immediate return). Returns the
/// actually-elapsed extent, which may be shorter than `dur` only on
/// cancellation.
///
/// # Errors
///
/// `PlatformError` when the one-shot timer cannot be created or armed. The
/// failure is scoped to this call; later calls start from scratch.
pub fn delay(
    dur: Extent,
    precision: PrecisionOption,
    cancel: Option<&CancelObserver>,
) -> Result<Extent, PlatformError> {
    if !dur.is_positive() {
        return Ok(Extent::ZERO);
    }
    let start = Timestamp::now();
    let spin_budget = min_period() * precision.tight_loop_factor();
    let _period = PeriodGuard::acquire();
    let timer = OneShotTimer::new()?;

    loop {
        if is_cancelled(cancel) {
            return Ok(start.elapsed());
        }
        let elapsed = start.elapsed();
        if elapsed >= dur {
            return Ok(elapsed);
        }
        if spin_budget.is_positive() && dur - elapsed <= spin_budget {
            return Ok(spin_until(start, dur, cancel));
        }
        timer.arm((dur - elapsed).min(SLEEP_CHUNK))?;
        timer.wait()?;
    }
}

/// Cooperative variant of [`delay`]: the 1 ms chunks are `tokio` sleeps and
/// therefore suspension points; cancellation is observed at each of them.
///
/// Returns the actually-elapsed extent. The cooperative path has no fallible
/// platform scheduling, so there is no error to report.
pub async fn delay_async(
    dur: Extent,
    precision: PrecisionOption,
    cancel: Option<&CancelObserver>,
) -> Extent {
    if !dur.is_positive() {
        return Extent::ZERO;
    }
    let start = Timestamp::now();
    let spin_budget = min_period() * precision.tight_loop_factor();
    let _period = PeriodGuard::acquire();

    loop {
        if is_cancelled(cancel) {
            return start.elapsed();
        }
        let elapsed = start.elapsed();
        if elapsed >= dur {
            return elapsed;
        }
        if spin_budget.is_positive() && dur - elapsed <= spin_budget {
            return spin_until(start, dur, cancel);
        }
        let chunk = (dur - elapsed).min(SLEEP_CHUNK);
        tokio::time::sleep(chunk.as_duration()).await;
    }
}

/// Tight-loop tail: burn the last stretch on CPU hints until the target or a
/// cancellation is reached.
fn spin_until(start: Timestamp, dur: Extent, cancel: Option<&CancelObserver>) -> Extent {
    loop {
        std::hint::spin_loop();
        if is_cancelled(cancel) || start.elapsed() >= dur {
            return start.elapsed();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;

    #[test]
    fn zero_and_negative_return_immediately() {
        let start = Timestamp::now();
        let elapsed = delay(Extent::ZERO, PrecisionOption::Maximum, None).expect("delay");
        assert_eq!(elapsed, Extent::ZERO);
        let elapsed =
            delay(Extent::from_millis_f64(-3.0), PrecisionOption::Default, None).expect("delay");
        assert_eq!(elapsed, Extent::ZERO);
        let elapsed = delay(Extent::NAN, PrecisionOption::High, None).expect("delay");
        assert_eq!(elapsed, Extent::ZERO);
        assert!(start.elapsed() < Extent::from_millis_f64(50.0));
    }

    #[test]
    fn blocking_delay_reaches_target() {
        for precision in [PrecisionOption::Default, PrecisionOption::Maximum] {
            let dur = Extent::from_millis_f64(5.0);
            let start = Timestamp::now();
            let reported = delay(dur, precision, None).expect("delay");
            let wall = start.elapsed();
            assert!(reported >= dur, "{precision:?}: reported {reported}");
            assert!(wall >= dur, "{precision:?}: wall {wall}");
            assert!(
                wall < Extent::from_millis_f64(50.0),
                "{precision:?}: wall {wall}"
            );
        }
    }

    #[test]
    fn sub_millisecond_delay() {
        let dur = Extent::from_millis_f64(0.3);
        let reported = delay(dur, PrecisionOption::Maximum, None).expect("delay");
        assert!(reported >= dur);
        assert!(reported < Extent::from_millis_f64(30.0));
    }

    #[test]
    fn cancellation_cuts_a_long_delay_short() {
        let src = CancelSource::new();
        let obs = src.observer();
        let canceller = {
            let src = src.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                src.cancel();
            })
        };
        let start = Timestamp::now();
        let reported =
            delay(Extent::from_secs_f64(5.0), PrecisionOption::High, Some(&obs)).expect("delay");
        let wall = start.elapsed();
        canceller.join().expect("join");
        assert!(reported < Extent::from_secs_f64(5.0));
        assert!(wall < Extent::from_secs_f64(1.0), "cancel too slow: {wall}");
    }

    #[test]
    fn already_cancelled_returns_promptly() {
        let src = CancelSource::new();
        src.cancel();
        let obs = src.observer();
        let start = Timestamp::now();
        let _ = delay(Extent::from_secs_f64(5.0), PrecisionOption::Default, Some(&obs))
            .expect("delay");
        assert!(start.elapsed() < Extent::from_millis_f64(50.0));
    }

    #[tokio::test]
    async fn async_delay_reaches_target() {
        let dur = Extent::from_millis_f64(5.0);
        let start = Timestamp::now();
        let reported = delay_async(dur, PrecisionOption::High, None).await;
        assert!(reported >= dur);
        assert!(start.elapsed() < Extent::from_millis_f64(100.0));
    }

    #[tokio::test]
    async fn async_delay_observes_cancellation() {
        let src = CancelSource::new();
        let obs = src.observer();
        let handle = {
            let src = src.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                src.cancel();
            })
        };
        let start = Timestamp::now();
        let reported = delay_async(Extent::from_secs_f64(5.0), PrecisionOption::Default, Some(&obs)).await;
        handle.await.expect("join");
        assert!(reported < Extent::from_secs_f64(5.0));
        assert!(start.elapsed() < Extent::from_secs_f64(1.0));
    }
}
