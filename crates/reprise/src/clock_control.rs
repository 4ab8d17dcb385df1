// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::Clock;
use crate::timers::{TimerKey, Timers};

/// Controls the flow of time in tests.
///
/// Time-sensitive code is slow and unreliable to test against the real
/// clock. A `ClockControl` owns a frozen instant and the timer registry
/// behind it: time only moves when [`ClockControl::advance`] is called, and
/// advancing fires every timer whose deadline has been reached. This makes
/// delay- and schedule-driven tests instantaneous and deterministic.
///
/// `ClockControl` is available when the `test-util` feature is enabled. Never
/// enable that feature for production code; keep it in `dev-dependencies`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use reprise::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let before = clock.instant();
/// control.advance(Duration::from_secs(1));
///
/// assert_eq!(clock.instant().duration_since(before), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClockControl {
    // Time control is shared across every clock cloned from this control,
    // and across every thread those clocks end up on.
    state: Arc<Mutex<ControlState>>,
}

impl ClockControl {
    /// Creates a control whose clock is frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts the control into a [`Clock`] sharing its state.
    ///
    /// Every clock produced by the same control observes the same instant
    /// and the same timers.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock::with_control(self)
    }

    /// Moves time forward by the given duration, firing every timer whose
    /// deadline falls within the advanced range.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.instant += duration;
        let now = state.instant;
        state.timers.advance(now);
    }

    /// Moves time forward by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub(crate) fn instant(&self) -> Instant {
        self.state.lock().instant
    }

    pub(crate) fn register_timer(&self, when: Instant, waker: Waker) -> TimerKey {
        self.state.lock().timers.register(when, waker)
    }

    pub(crate) fn unregister_timer(&self, key: TimerKey) {
        self.state.lock().timers.unregister(key);
    }

    pub(crate) fn timers_len(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl From<ClockControl> for Clock {
    fn from(control: ClockControl) -> Self {
        control.to_clock()
    }
}

impl From<&ClockControl> for Clock {
    fn from(control: &ClockControl) -> Self {
        control.to_clock()
    }
}

#[derive(Debug)]
struct ControlState {
    instant: Instant,
    timers: Timers,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            instant: Instant::now(),
            timers: Timers::default(),
        }
    }
}
