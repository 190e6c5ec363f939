//! Common re-exports.
//!
//! ```rust
//! use metron_common::prelude::*;
//!
//! let interval = Extent::from_hertz(75.0);
//! let start = Timestamp::now();
//! ```

pub use crate::clock::{ClockError, Timestamp};
pub use crate::extent::Extent;
