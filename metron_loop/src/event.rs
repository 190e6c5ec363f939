//! The per-cycle snapshot handed to user cycle functions.

use std::fmt;

use metron_common::extent::Extent;

/// Immutable snapshot of the loop's public state at the start of a cycle.
///
/// The driver owns the live state and hands each cycle a copy; mutating the
/// copy has no effect except for [`is_stop_requested`], which the driver
/// reads back after the user call returns.
///
/// [`is_stop_requested`]: CycleEvent::is_stop_requested
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleEvent {
    /// 0-based cycle index. Monotonically increases and skips ahead when
    /// cycles were missed.
    pub event_index: u64,

    /// Cycles missed on the immediately preceding cycle.
    pub missed_count: u32,

    /// Accumulated missed cycles over the whole run.
    pub total_missed: u64,

    /// Target interval currently configured for the loop.
    pub interval: Extent,

    /// Actual wall time between the previous and current cycle start,
    /// adjusted by the natural-drift correction.
    pub interval_elapsed: Extent,

    /// Windowed mean of `interval_elapsed`.
    pub interval_average: Extent,

    /// `1 / interval_average` in Hz; `0` while the average is zero.
    pub frequency: f64,

    /// Windowed standard deviation of `interval_elapsed` relative to the
    /// configured interval.
    pub interval_jitter: Extent,

    /// Wall time since the loop's first cycle start.
    pub natural_elapsed: Extent,

    /// Sum of all `interval_elapsed` values so far.
    pub discrete_elapsed: Extent,

    /// Set by the user to request a graceful stop; observed before the next
    /// cycle begins.
    pub is_stop_requested: bool,
}

impl fmt::Display for CycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} at {:.2}Hz (avg {}s, jitter {}s, missed {}/{})",
            self.event_index,
            self.frequency,
            self.interval_average,
            self.interval_jitter,
            self.missed_count,
            self.total_missed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_index_and_frequency() {
        let ev = CycleEvent {
            event_index: 42,
            frequency: 75.0,
            ..CycleEvent::default()
        };
        let text = format!("{ev}");
        assert!(text.contains("42"), "{text}");
        assert!(text.contains("75.00"), "{text}");
    }
}
