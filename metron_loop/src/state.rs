//! Per-cycle loop book-keeping: drift tracking, rolling statistics, missed
//! cycle detection.
//!
//! The update step is parameterised on the `now` timestamp rather than
//! reading the clock itself, so the whole drift-correction algorithm is
//! deterministic under test. Integer tick arithmetic is authoritative
//! throughout; seconds enter only for the jitter/frequency statistics.

use std::collections::VecDeque;

use metron_common::clock::Timestamp;
use metron_common::extent::{Extent, TICKS_PER_SECOND};

use crate::event::CycleEvent;

/// Hard cap on the rolling sample window, so a pathologically small interval
/// cannot ask for a gigabyte of samples.
const MAX_WINDOW: usize = 65_536;

/// A non-positive or NaN interval is coerced to one clock tick so the modular
/// drift arithmetic never divides by zero.
pub(crate) fn coerce_interval(interval: Extent) -> Extent {
    if interval.is_positive() {
        interval
    } else {
        Extent::from_ticks(1)
    }
}

/// Rolling window capacity: at least the sample threshold, and enough samples
/// to cover one second of cycles.
fn window_capacity(interval_ticks: i64, threshold: u32) -> usize {
    let per_second = (TICKS_PER_SECOND + interval_ticks - 1) / interval_ticks;
    per_second.max(threshold as i64).min(MAX_WINDOW as i64) as usize
}

/// Internal driver state, advanced once per cycle boundary.
#[derive(Debug)]
pub(crate) struct LoopState {
    event_index: u64,
    missed_count: u32,
    total_missed: u64,
    /// Residual the driver intends to sleep after the current cycle's work.
    next_delay: Extent,
    current_tick_ts: Timestamp,
    natural_start_ts: Timestamp,
    natural_elapsed: Extent,
    discrete_elapsed: Extent,
    interval_elapsed: Extent,
    interval_average: Extent,
    interval_jitter: Extent,
    samples: VecDeque<Extent>,
    sample_threshold: u32,
    first_cycle: bool,
}

impl LoopState {
    /// Seed the state at loop entry. `next_delay` starts at zero: the first
    /// cycle fires immediately and the first update then schedules exactly
    /// one interval.
    pub(crate) fn new(entry: Timestamp, sample_threshold: u32) -> Self {
        Self {
            event_index: 0,
            missed_count: 0,
            total_missed: 0,
            next_delay: Extent::ZERO,
            current_tick_ts: entry,
            natural_start_ts: entry,
            natural_elapsed: Extent::ZERO,
            discrete_elapsed: Extent::ZERO,
            interval_elapsed: Extent::ZERO,
            interval_average: Extent::ZERO,
            interval_jitter: Extent::ZERO,
            samples: VecDeque::new(),
            sample_threshold,
            first_cycle: true,
        }
    }

    /// Residual computed by the previous update.
    pub(crate) fn next_delay(&self) -> Extent {
        self.next_delay
    }

    /// Immutable copy of the public fields for the user cycle function.
    pub(crate) fn snapshot(&self, interval: Extent) -> CycleEvent {
        let avg_secs = self.interval_average.as_secs_f64();
        CycleEvent {
            event_index: self.event_index,
            missed_count: self.missed_count,
            total_missed: self.total_missed,
            interval: coerce_interval(interval),
            interval_elapsed: self.interval_elapsed,
            interval_average: self.interval_average,
            frequency: if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 },
            interval_jitter: self.interval_jitter,
            natural_elapsed: self.natural_elapsed,
            discrete_elapsed: self.discrete_elapsed,
            is_stop_requested: false,
        }
    }

    /// Advance the state across a cycle boundary.
    ///
    /// Runs after the user's work plus the post-work delay, with `now` being
    /// the start of the next cycle. The interval is re-read every call so it
    /// can be reconfigured between cycles.
    pub(crate) fn update(&mut self, now: Timestamp, interval: Extent) {
        let interval = coerce_interval(interval);
        let prev = self.current_tick_ts;
        let raw = if self.first_cycle {
            Extent::ZERO
        } else {
            now - prev
        };
        self.current_tick_ts = now;

        // Natural drift: discrete ticks accumulate less (or more) than
        // natural wall time. The mod clamps correction to within one
        // interval; a long user stall surfaces as missed cycles instead.
        let natural_drift = (self.natural_elapsed - self.discrete_elapsed) % interval;
        let interval_elapsed = raw + natural_drift;

        // Carry the residual the previous cycle intended to sleep.
        let mut next_delay = interval - (interval_elapsed - self.next_delay);

        self.discrete_elapsed = self.discrete_elapsed + interval_elapsed;

        if self.first_cycle {
            self.natural_start_ts = prev;
            self.natural_elapsed = self.discrete_elapsed;
            self.first_cycle = false;
        } else {
            self.natural_elapsed = now - self.natural_start_ts;
        }

        // Rolling window statistics.
        let capacity = window_capacity(interval.as_ticks(), self.sample_threshold);
        self.samples.push_back(interval_elapsed);
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
        let len = self.samples.len();
        let sum: i128 = self.samples.iter().map(|s| s.as_ticks() as i128).sum();
        self.interval_average = Extent::from_ticks((sum / len as i128) as i64);
        let variance = self
            .samples
            .iter()
            .map(|s| {
                let dev = (*s - interval).as_secs_f64();
                dev * dev
            })
            .sum::<f64>()
            / len as f64;
        self.interval_jitter = Extent::from_secs_f64(variance.sqrt());

        // Average drift correction engages at half the sample threshold.
        if len >= (self.sample_threshold / 2).max(1) as usize {
            let average_drift = (self.interval_average - interval) % interval;
            next_delay = next_delay - average_drift;
        }

        // Missed cycles: the would-be start already passed.
        let missed = if !next_delay.is_positive() {
            let behind = -(next_delay.as_ticks() as i128);
            let missed = 1 + behind / interval.as_ticks() as i128;
            next_delay = interval;
            missed.min(u32::MAX as i128) as u32
        } else {
            if next_delay > interval {
                // Correction never schedules further out than one interval.
                next_delay = interval;
            }
            0
        };
        self.missed_count = missed;
        self.total_missed += missed as u64;
        self.event_index += 1 + missed as u64;

        self.next_delay = next_delay;
        self.interval_elapsed = interval_elapsed;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
