//! Thread-backed precision loop façade.
//!
//! The user cycle function runs on a dedicated background OS thread; the
//! only blocking inside a cycle happens in the residual delay. The worker
//! best-effort raises its own scheduling class to `SCHED_FIFO`, which keeps
//! wake latency down on loaded hosts; refusal (no privilege) is harmless.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use metron_common::clock;
use metron_common::extent::Extent;

use crate::completion::ExitStatus;
use crate::driver::{CycleFn, DisposeAction, ErrorHook, FinishedHook, LifeCycle, LoopDriver, Phase};
use crate::error::{CycleResult, ErrorDecision, LoopError, PlatformError};
use crate::event::CycleEvent;
use crate::options::{LoopOptions, PrecisionOption};
use crate::state::coerce_interval;

/// RT priority requested for the loop worker. Modest on purpose: the worker
/// must not starve kernel threads, only win against ordinary load.
const WORKER_RT_PRIORITY: libc::c_int = 10;

fn raise_worker_priority() {
    let param = libc::sched_param {
        sched_priority: WORKER_RT_PRIORITY,
    };
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        trace!("SCHED_FIFO unavailable; loop worker keeps default scheduling");
    }
}

/// A precision loop running a plain cycle function on its own thread.
///
/// Lifecycle: [`start`](Self::start) at most once, [`dispose`](Self::dispose)
/// idempotent and non-blocking, [`wait_for_exit`](Self::wait_for_exit)
/// resolving after the finished hook has run.
pub struct PrecisionThread {
    life: Arc<LifeCycle>,
    interval_ticks: Arc<AtomicI64>,
    precision: PrecisionOption,
    sample_threshold: u32,
    cycle: Mutex<Option<CycleFn>>,
    error_hook: Mutex<Option<ErrorHook>>,
    finished_hook: Mutex<Option<FinishedHook>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PrecisionThread {
    /// Create a loop that will invoke `cycle` every `interval`.
    ///
    /// A non-positive or NaN interval is coerced to one clock tick.
    pub fn new<F>(cycle: F, interval: Extent, precision: PrecisionOption) -> Self
    where
        F: FnMut(&mut CycleEvent) -> CycleResult + Send + 'static,
    {
        Self::with_threshold(Box::new(cycle), interval, precision, 10)
    }

    /// Create a loop from declarative [`LoopOptions`].
    pub fn from_options<F>(cycle: F, options: &LoopOptions) -> Self
    where
        F: FnMut(&mut CycleEvent) -> CycleResult + Send + 'static,
    {
        Self::with_threshold(
            Box::new(cycle),
            options.interval(),
            options.precision,
            options.sample_threshold,
        )
    }

    fn with_threshold(
        cycle: CycleFn,
        interval: Extent,
        precision: PrecisionOption,
        sample_threshold: u32,
    ) -> Self {
        Self {
            life: LifeCycle::new(),
            interval_ticks: Arc::new(AtomicI64::new(coerce_interval(interval).as_ticks())),
            precision,
            sample_threshold,
            cycle: Mutex::new(Some(cycle)),
            error_hook: Mutex::new(None),
            finished_hook: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Install the failure hook consulted when a cycle returns an error.
    /// Without one, any cycle failure exits the loop.
    pub fn with_error_hook<H>(self, hook: H) -> Self
    where
        H: FnMut(&(dyn std::error::Error + Send + Sync)) -> ErrorDecision + Send + 'static,
    {
        *self.error_hook.lock() = Some(Box::new(hook));
        self
    }

    /// Install the hook invoked exactly once when the loop finishes, with
    /// the exit error if there was one.
    pub fn with_finished_hook<H>(self, hook: H) -> Self
    where
        H: FnOnce(Option<&LoopError>) + Send + 'static,
    {
        *self.finished_hook.lock() = Some(Box::new(hook));
        self
    }

    /// The currently configured interval.
    pub fn interval(&self) -> Extent {
        Extent::from_ticks(self.interval_ticks.load(Ordering::Relaxed))
    }

    /// Reconfigure the interval; the running loop picks it up on the next
    /// cycle boundary.
    pub fn set_interval(&self, interval: Extent) {
        self.interval_ticks
            .store(coerce_interval(interval).as_ticks(), Ordering::Relaxed);
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.life.phase()
    }

    /// Spawn the worker and enter the cycle loop.
    ///
    /// # Errors
    ///
    /// - [`LoopError::AlreadyStarted`] on a second call
    /// - [`LoopError::Disposed`] after disposal
    /// - [`LoopError::Clock`] when the monotonic source fails its probe
    pub fn start(&self) -> Result<(), LoopError> {
        clock::probe()?;
        let cancel = self.life.begin_start()?;
        let Some(cycle) = self.cycle.lock().take() else {
            let err = LoopError::AlreadyStarted;
            self.life.fail_start(err.clone());
            return Err(err);
        };
        let driver = LoopDriver::new(
            Arc::clone(&self.life),
            cancel,
            Arc::clone(&self.interval_ticks),
            self.precision,
            self.sample_threshold,
            self.error_hook.lock().take(),
            self.finished_hook.lock().take(),
        );
        let spawned = std::thread::Builder::new()
            .name("metron-loop".into())
            .spawn(move || {
                raise_worker_priority();
                driver.run_blocking(cycle);
            });
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = LoopError::Platform(PlatformError {
                    op: "thread_spawn",
                    errno: e.raw_os_error().unwrap_or(0),
                });
                self.life.fail_start(err.clone());
                Err(err)
            }
        }
    }

    /// Request termination without blocking. Idempotent; the running cycle
    /// is not pre-empted, cancellation lands at the next delay wake.
    pub fn dispose(&self) {
        if self.life.request_dispose() == DisposeAction::FinishNeverStarted {
            self.life.completion_ref().fulfill(Ok(()));
        }
    }

    /// Block until the loop has finished and its finished hook returned.
    pub fn wait_for_exit(&self) -> ExitStatus {
        let status = self.life.completion_ref().wait();
        self.reap_worker();
        status
    }

    /// Like [`wait_for_exit`](Self::wait_for_exit) with an upper bound;
    /// `None` while the loop is still running.
    pub fn wait_for_exit_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let status = self.life.completion_ref().wait_timeout(timeout)?;
        self.reap_worker();
        Some(status)
    }

    /// Join the worker thread once the completion has resolved. The worker
    /// is already past its finalisation at that point, so this returns
    /// promptly.
    fn reap_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for PrecisionThread {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn ms(x: f64) -> Extent {
        Extent::from_millis_f64(x)
    }

    #[test]
    fn start_then_dispose_resolves_successfully() {
        let finished = Arc::new(AtomicU32::new(0));
        let hook_seen = Arc::clone(&finished);
        let cycles = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&cycles);
        let thread = PrecisionThread::new(
            move |_ev| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            ms(1.0),
            PrecisionOption::Default,
        )
        .with_finished_hook(move |err| {
            assert!(err.is_none());
            hook_seen.fetch_add(1, Ordering::SeqCst);
        });

        thread.start().expect("start");
        std::thread::sleep(Duration::from_millis(20));
        thread.dispose();
        thread.dispose();
        assert!(thread.wait_for_exit().is_ok());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(cycles.load(Ordering::SeqCst) >= 1);
        assert_eq!(thread.phase(), Phase::Disposed);
    }

    #[test]
    fn second_start_is_rejected() {
        let thread = PrecisionThread::new(|_ev| Ok(()), ms(1.0), PrecisionOption::Default);
        thread.start().expect("first start");
        assert!(matches!(thread.start(), Err(LoopError::AlreadyStarted)));
        thread.dispose();
        assert!(thread.wait_for_exit().is_ok());
    }

    #[test]
    fn start_after_dispose_is_rejected() {
        let thread = PrecisionThread::new(|_ev| Ok(()), ms(1.0), PrecisionOption::Default);
        thread.dispose();
        assert!(matches!(thread.start(), Err(LoopError::Disposed)));
        // Dispose before start still resolves waiters.
        assert!(thread.wait_for_exit().is_ok());
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let thread = PrecisionThread::new(
            |ev| {
                if ev.event_index >= 20 {
                    ev.is_stop_requested = true;
                }
                Ok(())
            },
            ms(1.0),
            PrecisionOption::Default,
        );
        thread.start().expect("start");
        let status = thread
            .wait_for_exit_timeout(Duration::from_secs(5))
            .expect("loop should stop itself");
        assert!(status.is_ok());
    }

    #[test]
    fn interval_is_reconfigurable() {
        let thread = PrecisionThread::new(|_ev| Ok(()), ms(10.0), PrecisionOption::Default);
        assert_eq!(thread.interval(), ms(10.0));
        thread.set_interval(ms(20.0));
        assert_eq!(thread.interval(), ms(20.0));
        thread.set_interval(Extent::ZERO);
        assert_eq!(thread.interval(), Extent::from_ticks(1));
        thread.dispose();
    }

    #[test]
    fn failing_cycle_reaches_the_completion() {
        let thread = PrecisionThread::new(
            |_ev| Err("bad tick".into()),
            ms(1.0),
            PrecisionOption::Default,
        );
        thread.start().expect("start");
        let status = thread
            .wait_for_exit_timeout(Duration::from_secs(5))
            .expect("loop should exit on error");
        match status {
            Err(LoopError::CycleFailed { reason }) => assert!(reason.contains("bad tick")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
