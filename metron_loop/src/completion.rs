//! Termination coordination: a completion handle fulfilled exactly once.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::LoopError;

/// How a loop run ended. Cancellation resolves as success.
pub type ExitStatus = Result<(), LoopError>;

/// Shared handle that resolves once the loop's "finished" hook has returned.
///
/// Shared by the driver and any number of external waiters; fulfilled exactly
/// once. Supports blocking, timed, and async waits.
#[derive(Debug, Default)]
pub struct Completion {
    status: Mutex<Option<ExitStatus>>,
    cond: Condvar,
    notify: Notify,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the exit status and wake every waiter. Later calls are no-ops,
    /// keeping the first status authoritative.
    pub(crate) fn fulfill(&self, status: ExitStatus) {
        {
            let mut slot = self.status.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(status);
        }
        self.cond.notify_all();
        self.notify.notify_waiters();
    }

    /// The exit status, if the loop has already finished.
    pub fn try_status(&self) -> Option<ExitStatus> {
        self.status.lock().clone()
    }

    /// Block until the loop finishes.
    pub fn wait(&self) -> ExitStatus {
        let mut slot = self.status.lock();
        while slot.is_none() {
            self.cond.wait(&mut slot);
        }
        slot.clone().unwrap_or(Ok(()))
    }

    /// Block up to `timeout`; `None` when the loop is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let mut slot = self.status.lock();
        if slot.is_none() {
            self.cond.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }

    /// Await the loop finishing without blocking the runtime.
    pub async fn wait_async(&self) -> ExitStatus {
        loop {
            let notified = self.notify.notified();
            if let Some(status) = self.try_status() {
                return status;
            }
            notified.await;
        }
    }
}
