//! Asynchronous precision loop façade.
//!
//! The user cycle is an async function awaited by the driver inside a tokio
//! task; the 1 ms chunks of the residual delay are cooperative suspension
//! points, the final spin stays synchronous. The handler receives a weak
//! cancellation observer so long-running cycles can bail out early when the
//! loop is being disposed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use metron_common::clock;
use metron_common::extent::Extent;

use crate::cancel::CancelObserver;
use crate::completion::ExitStatus;
use crate::driver::{DisposeAction, ErrorHook, FinishedHook, LifeCycle, LoopDriver, Phase};
use crate::error::{CycleResult, ErrorDecision, LoopError, PlatformError};
use crate::event::CycleEvent;
use crate::options::{LoopOptions, PrecisionOption};
use crate::state::coerce_interval;

/// Boxed future returned by one async cycle invocation.
pub type BoxedCycleFuture<'a> = Pin<Box<dyn Future<Output = CycleResult> + Send + 'a>>;

/// An asynchronous cycle handler.
///
/// The returned future may borrow both the handler and the event, which is
/// how `is_stop_requested` travels back to the driver across an `await`.
///
/// # Example
///
/// ```rust,ignore
/// struct Blinker {
///     on: bool,
/// }
///
/// impl TaskCycle for Blinker {
///     fn cycle<'a>(
///         &'a mut self,
///         ev: &'a mut CycleEvent,
///         _cancel: CancelObserver,
///     ) -> BoxedCycleFuture<'a> {
///         Box::pin(async move {
///             self.on = !self.on;
///             if ev.event_index >= 1000 {
///                 ev.is_stop_requested = true;
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait TaskCycle: Send {
    /// Run one cycle against the snapshot.
    fn cycle<'a>(
        &'a mut self,
        event: &'a mut CycleEvent,
        cancel: CancelObserver,
    ) -> BoxedCycleFuture<'a>;
}

/// A precision loop running an async cycle handler as a tokio task.
pub struct PrecisionTask {
    life: Arc<LifeCycle>,
    interval_ticks: Arc<AtomicI64>,
    precision: PrecisionOption,
    sample_threshold: u32,
    cycle: Mutex<Option<Box<dyn TaskCycle>>>,
    error_hook: Mutex<Option<ErrorHook>>,
    finished_hook: Mutex<Option<FinishedHook>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PrecisionTask {
    /// Create a loop that will await `cycle` every `interval`.
    pub fn new<C>(cycle: C, interval: Extent, precision: PrecisionOption) -> Self
    where
        C: TaskCycle + 'static,
    {
        Self::with_threshold(Box::new(cycle), interval, precision, 10)
    }

    /// Create a loop from declarative [`LoopOptions`].
    pub fn from_options<C>(cycle: C, options: &LoopOptions) -> Self
    where
        C: TaskCycle + 'static,
    {
        Self::with_threshold(
            Box::new(cycle),
            options.interval(),
            options.precision,
            options.sample_threshold,
        )
    }

    fn with_threshold(
        cycle: Box<dyn TaskCycle>,
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

    /// See [`PrecisionThread::with_error_hook`](crate::thread::PrecisionThread::with_error_hook).
    pub fn with_error_hook<H>(self, hook: H) -> Self
    where
        H: FnMut(&(dyn std::error::Error + Send + Sync)) -> ErrorDecision + Send + 'static,
    {
        *self.error_hook.lock() = Some(Box::new(hook));
        self
    }

    /// See [`PrecisionThread::with_finished_hook`](crate::thread::PrecisionThread::with_finished_hook).
    pub fn with_finished_hook<H>(self, hook: H) -> Self
    where
        H: FnOnce(Option<&LoopError>) + Send + 'static,
    {
        *self.finished_hook.lock() = Some(Box::new(hook));
        self
    }

    pub fn interval(&self) -> Extent {
        Extent::from_ticks(self.interval_ticks.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, interval: Extent) {
        self.interval_ticks
            .store(coerce_interval(interval).as_ticks(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        self.life.phase()
    }

    /// Spawn the loop onto the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Everything [`PrecisionThread::start`](crate::thread::PrecisionThread::start)
    /// can return, plus a platform error when no tokio runtime is entered.
    pub fn start(&self) -> Result<(), LoopError> {
        clock::probe()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LoopError::Platform(PlatformError {
                op: "tokio_runtime",
                errno: 0,
            })
        })?;
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
        let handle = runtime.spawn(driver.run_cooperative(cycle));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Request termination without blocking. Idempotent.
    pub fn dispose(&self) {
        if self.life.request_dispose() == DisposeAction::FinishNeverStarted {
            self.life.completion_ref().fulfill(Ok(()));
        }
    }

    /// Await the loop finishing.
    pub async fn wait_for_exit_async(&self) -> ExitStatus {
        let status = self.life.completion_ref().wait_async().await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        status
    }

    /// Blocking wait, for callers outside the runtime.
    pub fn wait_for_exit(&self) -> ExitStatus {
        let status = self.life.completion_ref().wait();
        drop(self.worker.lock().take());
        status
    }

    /// Bounded blocking wait; `None` while the loop is still running.
    pub fn wait_for_exit_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let status = self.life.completion_ref().wait_timeout(timeout)?;
        drop(self.worker.lock().take());
        Some(status)
    }
}

impl Drop for PrecisionTask {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingCycle {
        cycles: Arc<AtomicU32>,
        stop_at: u64,
    }

    impl TaskCycle for CountingCycle {
        fn cycle<'a>(
            &'a mut self,
            event: &'a mut CycleEvent,
            _cancel: CancelObserver,
        ) -> BoxedCycleFuture<'a> {
            Box::pin(async move {
                self.cycles.fetch_add(1, Ordering::SeqCst);
                if event.event_index >= self.stop_at {
                    event.is_stop_requested = true;
                }
                Ok(())
            })
        }
    }

    struct FailingCycle;

    impl TaskCycle for FailingCycle {
        fn cycle<'a>(
            &'a mut self,
            _event: &'a mut CycleEvent,
            _cancel: CancelObserver,
        ) -> BoxedCycleFuture<'a> {
            Box::pin(async {
                let result: CycleResult = Err("async tick failed".into());
                result
            })
        }
    }

    #[tokio::test]
    async fn async_loop_stops_itself() {
        let cycles = Arc::new(AtomicU32::new(0));
        let task = PrecisionTask::new(
            CountingCycle {
                cycles: Arc::clone(&cycles),
                stop_at: 10,
            },
            Extent::from_millis_f64(1.0),
            PrecisionOption::Default,
        );
        task.start().expect("start");
        assert!(task.wait_for_exit_async().await.is_ok());
        assert!(cycles.load(Ordering::SeqCst) >= 10);
        assert_eq!(task.phase(), Phase::Disposed);
    }

    #[tokio::test]
    async fn dispose_cancels_the_running_task() {
        let cycles = Arc::new(AtomicU32::new(0));
        let task = PrecisionTask::new(
            CountingCycle {
                cycles: Arc::clone(&cycles),
                stop_at: u64::MAX,
            },
            Extent::from_millis_f64(1.0),
            PrecisionOption::Default,
        );
        task.start().expect("start");
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.dispose();
        assert!(task.wait_for_exit_async().await.is_ok());
    }

    #[tokio::test]
    async fn async_failure_reaches_completion() {
        let task = PrecisionTask::new(
            FailingCycle,
            Extent::from_millis_f64(1.0),
            PrecisionOption::Default,
        );
        task.start().expect("start");
        let status = task.wait_for_exit_async().await;
        match status {
            Err(LoopError::CycleFailed { reason }) => {
                assert!(reason.contains("async tick failed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn start_outside_runtime_is_a_platform_error() {
        let task = PrecisionTask::new(
            FailingCycle,
            Extent::from_millis_f64(1.0),
            PrecisionOption::Default,
        );
        assert!(matches!(
            task.start(),
            Err(LoopError::Platform(PlatformError {
                op: "tokio_runtime",
                ..
            }))
        ));
    }
}
