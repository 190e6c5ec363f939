//! Monotonic cancellation flag with weak observers.
//!
//! The driver owns the [`CancelSource`]; the delay primitive only ever holds
//! a [`CancelObserver`] (a weak handle), so in-flight delays cannot keep a
//! finished loop's cancellation state alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Owner side of the cancellation flag. Cancellation is monotonic: once set,
/// it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    flag: Arc<AtomicBool>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Create a weak observer of this source.
    pub fn observer(&self) -> CancelObserver {
        CancelObserver {
            flag: Arc::downgrade(&self.flag),
        }
    }
}

/// Observer side of the cancellation flag.
///
/// Holds only a weak reference; a dangling observer (its source dropped)
/// reads as cancelled, which makes waiters unwind rather than sleep on.
#[derive(Debug, Clone)]
pub struct CancelObserver {
    flag: Weak<AtomicBool>,
}

impl CancelObserver {
    pub fn is_cancelled(&self) -> bool {
        match self.flag.upgrade() {
            Some(flag) => flag.load(Ordering::Acquire),
            None => true,
        }
    }
}
