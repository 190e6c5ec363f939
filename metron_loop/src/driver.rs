//! The precision loop driver: lifecycle state machine and the single cycle
//! body shared by every façade.
//!
//! The three façades compose one [`LoopDriver`] with a pluggable way of
//! invoking the user cycle function; the loop body is never replicated. The
//! sync and async run paths differ only in how the user call and the
//! residual delay suspend.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use metron_common::clock::Timestamp;
use metron_common::extent::Extent;

use crate::cancel::CancelSource;
use crate::completion::Completion;
use crate::delay::{delay, delay_async};
use crate::error::{CycleResult, ErrorDecision, LoopError};
use crate::event::CycleEvent;
use crate::options::PrecisionOption;
use crate::state::LoopState;
use crate::task::TaskCycle;

/// Lifecycle of a loop façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Constructed, not yet started.
    Created = 0,
    /// Worker running the cycle loop.
    Running = 1,
    /// Cancellation requested; the worker is finalising.
    Finishing = 2,
    /// Terminal.
    Disposed = 3,
}

/// Boxed user cycle function for the thread-backed façades.
pub(crate) type CycleFn = Box<dyn FnMut(&mut CycleEvent) -> CycleResult + Send>;

/// Hook consulted when a user cycle fails.
pub(crate) type ErrorHook =
    Box<dyn FnMut(&(dyn std::error::Error + Send + Sync)) -> ErrorDecision + Send>;

/// Hook invoked exactly once when the loop has finished.
pub(crate) type FinishedHook = Box<dyn FnOnce(Option<&LoopError>) + Send>;

/// What [`LifeCycle::request_dispose`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisposeAction {
    /// Disposed straight from `Created`; no worker ever ran.
    FinishNeverStarted,
    /// A running worker was asked to cancel.
    CancelRunning,
    /// Already finishing or disposed.
    Noop,
}

/// Shared lifecycle record between a façade and its worker.
///
/// The single mutex around the lazy cancellation source serialises `dispose`
/// against `start`; the happy path takes no lock at all.
#[derive(Debug)]
pub(crate) struct LifeCycle {
    phase: Mutex<Phase>,
    cancel: Mutex<Option<CancelSource>>,
    completion: Arc<Completion>,
}

impl LifeCycle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Created),
            cancel: Mutex::new(None),
            completion: Arc::new(Completion::new()),
        })
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub(crate) fn completion_ref(&self) -> &Arc<Completion> {
        &self.completion
    }

    /// `Created → Running`, creating the cancellation source.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` from `Running`/`Finishing`, `Disposed` afterwards.
    pub(crate) fn begin_start(&self) -> Result<CancelSource, LoopError> {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Created => {
                let source = CancelSource::new();
                *self.cancel.lock() = Some(source.clone());
                *phase = Phase::Running;
                Ok(source)
            }
            Phase::Disposed => Err(LoopError::Disposed),
            Phase::Running | Phase::Finishing => Err(LoopError::AlreadyStarted),
        }
    }

    /// Roll back a start whose worker could not be spawned.
    pub(crate) fn fail_start(&self, err: LoopError) {
        *self.phase.lock() = Phase::Disposed;
        self.completion.fulfill(Err(err));
    }

    /// Idempotent, non-blocking dispose request.
    pub(crate) fn request_dispose(&self) -> DisposeAction {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Created => {
                *phase = Phase::Disposed;
                DisposeAction::FinishNeverStarted
            }
            Phase::Running => {
                *phase = Phase::Finishing;
                if let Some(source) = self.cancel.lock().as_ref() {
                    source.cancel();
                }
                DisposeAction::CancelRunning
            }
            Phase::Finishing | Phase::Disposed => DisposeAction::Noop,
        }
    }

    /// `Running → Finishing` when the worker exits on its own accord.
    fn begin_finishing(&self) {
        let mut phase = self.phase.lock();
        if *phase == Phase::Running {
            *phase = Phase::Finishing;
        }
    }

    fn mark_disposed(&self) {
        *self.phase.lock() = Phase::Disposed;
    }
}

/// One run of the precision loop.
///
/// Owns the loop state, the cancellation source, and the user hooks; the
/// delay primitive only ever sees a weak observer of the source.
pub(crate) struct LoopDriver {
    life: Arc<LifeCycle>,
    cancel: CancelSource,
    interval_ticks: Arc<AtomicI64>,
    precision: PrecisionOption,
    state: LoopState,
    error_hook: Option<ErrorHook>,
    finished_hook: Option<FinishedHook>,
    exit_error: Option<LoopError>,
}

impl LoopDriver {
    pub(crate) fn new(
        life: Arc<LifeCycle>,
        cancel: CancelSource,
        interval_ticks: Arc<AtomicI64>,
        precision: PrecisionOption,
        sample_threshold: u32,
        error_hook: Option<ErrorHook>,
        finished_hook: Option<FinishedHook>,
    ) -> Self {
        Self {
            life,
            cancel,
            interval_ticks,
            precision,
            state: LoopState::new(Timestamp::now(), sample_threshold),
            error_hook,
            finished_hook,
            exit_error: None,
        }
    }

    /// The interval is re-read every cycle so it can be reconfigured while
    /// the loop runs.
    fn interval(&self) -> Extent {
        Extent::from_ticks(self.interval_ticks.load(Ordering::Relaxed))
    }

    /// Stop-flag and failure handling after one user invocation.
    fn absorb_outcome(&mut self, ev: &CycleEvent, result: CycleResult) {
        if ev.is_stop_requested {
            debug!(cycle = ev.event_index, "stop requested from cycle handler");
            self.cancel.cancel();
        }
        if let Err(fault) = result {
            let decision = match self.error_hook.as_mut() {
                Some(hook) => hook(fault.as_ref()),
                None => ErrorDecision::Exit,
            };
            match decision {
                ErrorDecision::Continue => {
                    warn!(error = %fault, "cycle handler failed; loop continues");
                }
                ErrorDecision::Exit => {
                    self.exit_error = Some(LoopError::CycleFailed {
                        reason: fault.to_string(),
                    });
                    self.cancel.cancel();
                }
            }
        }
    }

    /// Blocking run path for the thread-backed façades.
    pub(crate) fn run_blocking(mut self, mut cycle: CycleFn) {
        let observer = self.cancel.observer();
        debug!(interval = %self.interval(), "precision loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut ev = self.state.snapshot(self.interval());
            let result = cycle(&mut ev);
            self.absorb_outcome(&ev, result);
            let residual = self.state.next_delay();
            if residual.is_positive() {
                // A platform failure is fatal to this delay call only: the
                // cycle runs unpaced once and drift correction absorbs it.
                if let Err(e) = delay(residual, self.precision, Some(&observer)) {
                    warn!(error = %e, "residual delay failed");
                }
            }
            self.state.update(Timestamp::now(), self.interval());
        }
        self.finish();
    }

    /// Cooperative run path for the task façade. The 1 ms waits inside the
    /// residual delay are suspension points; the user cycle is awaited.
    pub(crate) async fn run_cooperative(mut self, mut cycle: Box<dyn TaskCycle>) {
        let observer = self.cancel.observer();
        debug!(interval = %self.interval(), "precision task loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut ev = self.state.snapshot(self.interval());
            let result = cycle.cycle(&mut ev, self.cancel.observer()).await;
            self.absorb_outcome(&ev, result);
            let residual = self.state.next_delay();
            if residual.is_positive() {
                delay_async(residual, self.precision, Some(&observer)).await;
            }
            self.state.update(Timestamp::now(), self.interval());
        }
        self.finish();
    }

    /// Finalisation: finished hook first, then the completion handle, then
    /// the terminal phase. Runs exactly once per started loop.
    fn finish(mut self) {
        self.life.begin_finishing();
        let final_ev = self.state.snapshot(self.interval());
        match &self.exit_error {
            Some(e) => warn!(error = %e, "precision loop exiting: {final_ev}"),
            None => debug!("precision loop exiting: {final_ev}"),
        }
        let status = match &self.exit_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        };
        if let Some(hook) = self.finished_hook.take() {
            hook(self.exit_error.as_ref());
        }
        self.life.mark_disposed();
        self.life.completion.fulfill(status);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn interval_handle(ms: f64) -> Arc<AtomicI64> {
        Arc::new(AtomicI64::new(Extent::from_millis_f64(ms).as_ticks()))
    }

    #[test]
    fn lifecycle_transitions() {
        let life = LifeCycle::new();
        assert_eq!(life.phase(), Phase::Created);
        let _cancel = life.begin_start().expect("first start");
        assert_eq!(life.phase(), Phase::Running);
        assert!(matches!(life.begin_start(), Err(LoopError::AlreadyStarted)));
        assert_eq!(life.request_dispose(), DisposeAction::CancelRunning);
        assert_eq!(life.phase(), Phase::Finishing);
        assert_eq!(life.request_dispose(), DisposeAction::Noop);
        life.mark_disposed();
        assert!(matches!(life.begin_start(), Err(LoopError::Disposed)));
    }

    #[test]
    fn dispose_before_start_is_terminal() {
        let life = LifeCycle::new();
        assert_eq!(life.request_dispose(), DisposeAction::FinishNeverStarted);
        assert_eq!(life.phase(), Phase::Disposed);
        assert!(matches!(life.begin_start(), Err(LoopError::Disposed)));
        assert_eq!(life.request_dispose(), DisposeAction::Noop);
    }

    #[test]
    fn stop_flag_terminates_with_success() {
        let life = LifeCycle::new();
        let cancel = life.begin_start().expect("start");
        let finished = Arc::new(AtomicU32::new(0));
        let hook_count = Arc::clone(&finished);
        let driver = LoopDriver::new(
            Arc::clone(&life),
            cancel,
            interval_handle(1.0),
            PrecisionOption::Default,
            10,
            None,
            Some(Box::new(move |err| {
                assert!(err.is_none());
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let cycles = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&cycles);
        driver.run_blocking(Box::new(move |ev| {
            seen.fetch_add(1, Ordering::SeqCst);
            if ev.event_index >= 5 {
                ev.is_stop_requested = true;
            }
            Ok(())
        }));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(cycles.load(Ordering::SeqCst) >= 5);
        assert_eq!(life.phase(), Phase::Disposed);
        assert!(life.completion_ref().try_status().expect("resolved").is_ok());
    }

    #[test]
    fn cycle_error_without_hook_exits_with_failure() {
        let life = LifeCycle::new();
        let cancel = life.begin_start().expect("start");
        let driver = LoopDriver::new(
            Arc::clone(&life),
            cancel,
            interval_handle(1.0),
            PrecisionOption::Default,
            10,
            None,
            None,
        );
        driver.run_blocking(Box::new(|_ev| Err("sensor went away".into())));
        let status = life.completion_ref().try_status().expect("resolved");
        match status {
            Err(LoopError::CycleFailed { reason }) => {
                assert!(reason.contains("sensor went away"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn continue_decision_keeps_the_loop_alive() {
        let life = LifeCycle::new();
        let cancel = life.begin_start().expect("start");
        let handled = Arc::new(AtomicU32::new(0));
        let hook_seen = Arc::clone(&handled);
        let driver = LoopDriver::new(
            Arc::clone(&life),
            cancel,
            interval_handle(1.0),
            PrecisionOption::Default,
            10,
            Some(Box::new(move |_err| {
                hook_seen.fetch_add(1, Ordering::SeqCst);
                ErrorDecision::Continue
            })),
            None,
        );
        driver.run_blocking(Box::new(|ev| {
            if ev.event_index >= 8 {
                ev.is_stop_requested = true;
                return Ok(());
            }
            if ev.event_index % 2 == 0 {
                return Err("flaky".into());
            }
            Ok(())
        }));
        assert!(handled.load(Ordering::SeqCst) >= 3);
        assert!(life.completion_ref().try_status().expect("resolved").is_ok());
    }
}
