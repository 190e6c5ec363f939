//! # Metron Loop Engine
//!
//! Monotonic, drift-corrected, sub-millisecond periodic scheduler for
//! general-purpose Linux. Executes a user cycle function at a requested
//! interval (e.g. 13.333 ms for 75 Hz) with low jitter, no long-term drift,
//! and bounded CPU cost.
//!
//! ## Architecture
//!
//! - [`delay`] / [`delay_async`] — precision waits composing ≤1 ms one-shot
//!   sleeps with a bounded spin tail ([`PrecisionOption`])
//! - [`PrecisionThread`] — cycle function on a dedicated worker thread
//! - [`PrecisionTimer`] — single-subscriber callback timer
//! - [`PrecisionTask`] — async cycle handler on a tokio task
//!
//! All three façades compose the same loop driver: per-cycle statistics
//! (elapsed, average, jitter, missed cycles) and a continuous correction of
//! the next residual delay so the sum of discrete intervals tracks the
//! natural wall time elapsed since start.

pub mod cancel;
pub mod completion;
pub mod delay;
mod driver;
pub mod error;
pub mod event;
pub mod options;
pub mod platform;
mod state;
pub mod task;
pub mod thread;
pub mod timer;

pub use cancel::{CancelObserver, CancelSource};
pub use completion::{Completion, ExitStatus};
pub use delay::{delay, delay_async};
pub use driver::Phase;
pub use error::{CycleFault, CycleResult, ErrorDecision, LoopError, PlatformError};
pub use event::CycleEvent;
pub use options::{LoopOptions, OptionsError, PrecisionOption};
pub use task::{BoxedCycleFuture, PrecisionTask, TaskCycle};
pub use thread::PrecisionThread;
pub use timer::PrecisionTimer;

pub use metron_common::clock::{ClockError, Timestamp};
pub use metron_common::extent::Extent;
