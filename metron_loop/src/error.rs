//! Error types for the loop engine.
//!
//! `PlatformError` is scoped to a single delay call; `LoopError` is what a
//! whole loop run terminates with. Cancellation is deliberately absent from
//! both: it is a normal termination path, not an error.

use metron_common::clock::ClockError;
use thiserror::Error;

/// A platform one-shot timer operation failed.
///
/// Fatal to the enclosing delay call only; it must not poison subsequent
/// delay calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("platform timer failure in {op}: errno {errno}")]
pub struct PlatformError {
    /// The operation that failed (e.g. `timerfd_create`).
    pub op: &'static str,
    /// Native OS error code.
    pub errno: i32,
}

impl PlatformError {
    pub(crate) fn from_errno(op: &'static str, err: nix::Error) -> Self {
        Self {
            op,
            errno: err as i32,
        }
    }
}

/// Errors a loop façade can return or terminate with.
#[derive(Debug, Clone, Error)]
pub enum LoopError {
    /// `start` invoked more than once.
    #[error("loop already started")]
    AlreadyStarted,

    /// Method invoked after disposal.
    #[error("loop disposed")]
    Disposed,

    /// The monotonic clock source is unusable.
    #[error("clock source rejected: {0}")]
    Clock(#[from] ClockError),

    /// Underlying platform timer failed outside a recoverable context.
    #[error("{0}")]
    Platform(#[from] PlatformError),

    /// The user cycle function failed and the failure hook chose to exit.
    #[error("cycle handler failed: {reason}")]
    CycleFailed {
        /// Rendered user error.
        reason: String,
    },
}

/// Failure value a user cycle function may return.
pub type CycleFault = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one user cycle invocation.
pub type CycleResult = Result<(), CycleFault>;

/// What the failure hook tells the driver to do after a cycle error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Keep cycling; the error is logged and dropped.
    Continue,
    /// Record the error and terminate the loop. This is the default when no
    /// hook is installed, so errors are never swallowed silently.
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_display() {
        let e = PlatformError {
            op: "timerfd_create",
            errno: 24,
        };
        let msg = format!("{e}");
        assert!(msg.contains("timerfd_create"), "{msg}");
        assert!(msg.contains("24"), "{msg}");
    }

    #[test]
    fn loop_error_wraps_platform() {
        let e = LoopError::from(PlatformError {
            op: "timerfd_settime",
            errno: 22,
        });
        assert!(format!("{e}").contains("timerfd_settime"));
    }

    #[test]
    fn cycle_failed_display() {
        let e = LoopError::CycleFailed {
            reason: "sensor went away".into(),
        };
        assert!(format!("{e}").contains("sensor went away"));
    }
}
