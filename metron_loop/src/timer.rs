//! Callback-timer façade: one observer slot fired on each cycle.
//!
//! Composition over a [`PrecisionThread`]: the timer owns the subscriber
//! slot and forwards every cycle to whatever handler is currently installed.
//! A cycle with no subscriber still ticks (and still keeps cadence).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use metron_common::extent::Extent;

use crate::completion::ExitStatus;
use crate::driver::{CycleFn, Phase};
use crate::error::{CycleResult, ErrorDecision, LoopError};
use crate::event::CycleEvent;
use crate::options::{LoopOptions, PrecisionOption};
use crate::thread::PrecisionThread;

/// A precision timer with a single subscriber slot.
pub struct PrecisionTimer {
    handler: Arc<Mutex<Option<CycleFn>>>,
    thread: PrecisionThread,
}

impl PrecisionTimer {
    /// Create a timer ticking every `interval`. Install the subscriber with
    /// [`set_handler`](Self::set_handler) before or after starting.
    pub fn new(interval: Extent, precision: PrecisionOption) -> Self {
        let handler: Arc<Mutex<Option<CycleFn>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handler);
        let thread = PrecisionThread::new(
            move |ev| match slot.lock().as_mut() {
                Some(subscriber) => subscriber(ev),
                None => Ok(()),
            },
            interval,
            precision,
        );
        Self { handler, thread }
    }

    /// Create a timer from declarative [`LoopOptions`].
    pub fn from_options(options: &LoopOptions) -> Self {
        let handler: Arc<Mutex<Option<CycleFn>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handler);
        let thread = PrecisionThread::from_options(
            move |ev| match slot.lock().as_mut() {
                Some(subscriber) => subscriber(ev),
                None => Ok(()),
            },
            options,
        );
        Self { handler, thread }
    }

    /// Install (or replace) the single subscriber.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(&mut CycleEvent) -> CycleResult + Send + 'static,
    {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Remove the subscriber; the timer keeps ticking silently.
    pub fn clear_handler(&self) {
        *self.handler.lock() = None;
    }

    /// See [`PrecisionThread::with_error_hook`].
    pub fn with_error_hook<H>(self, hook: H) -> Self
    where
        H: FnMut(&(dyn std::error::Error + Send + Sync)) -> ErrorDecision + Send + 'static,
    {
        Self {
            handler: self.handler.clone(),
            thread: self.thread.with_error_hook(hook),
        }
    }

    /// See [`PrecisionThread::with_finished_hook`].
    pub fn with_finished_hook<H>(self, hook: H) -> Self
    where
        H: FnOnce(Option<&LoopError>) + Send + 'static,
    {
        Self {
            handler: self.handler.clone(),
            thread: self.thread.with_finished_hook(hook),
        }
    }

    pub fn interval(&self) -> Extent {
        self.thread.interval()
    }

    pub fn set_interval(&self, interval: Extent) {
        self.thread.set_interval(interval);
    }

    pub fn phase(&self) -> Phase {
        self.thread.phase()
    }

    /// Start ticking. Same contract as [`PrecisionThread::start`].
    pub fn start(&self) -> Result<(), LoopError> {
        self.thread.start()
    }

    /// Request termination without blocking. Idempotent.
    pub fn dispose(&self) {
        self.thread.dispose();
    }

    /// Block until the timer has finished.
    pub fn wait_for_exit(&self) -> ExitStatus {
        self.thread.wait_for_exit()
    }

    /// Bounded wait; `None` while the timer is still running.
    pub fn wait_for_exit_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        self.thread.wait_for_exit_timeout(timeout)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
