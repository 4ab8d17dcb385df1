// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::task::Waker;
#[cfg(any(feature = "tokio", test))]
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

#[cfg(any(feature = "test-util", test))]
use crate::ClockControl;
use crate::delay::Delay;
use crate::timers::{TimerKey, Timers};

/// Provides the current instant and drives cancellable delays.
///
/// The clock exists so that time can be abstracted away from the code that
/// consumes it. Production clocks read the machine's monotonic instant and
/// are driven by the async runtime; test clocks are frozen and driven
/// manually through [`ClockControl`] (feature `test-util`), which makes
/// time-dependent tests instantaneous and deterministic.
///
/// Cloning a clock is cheap and preserves shared state: every clone observes
/// the same instant source and the same timer registry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use reprise::Clock;
///
/// # async fn example(clock: &Clock) {
/// let before = clock.instant();
///
/// // Wait for 10 milliseconds.
/// clock.delay(Duration::from_millis(10)).await;
///
/// assert!(clock.instant().duration_since(before) >= Duration::from_millis(10));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Clock(ClockInner);

#[derive(Debug, Clone)]
enum ClockInner {
    System(Arc<SystemClock>),
    #[cfg(any(feature = "test-util", test))]
    Controlled(ClockControl),
}

/// How often the runtime-driven task evaluates pending timers.
///
/// This bounds the precision of every delay: a timer can fire up to one
/// cadence late. Coarser cadences cost less CPU; this value matches the
/// precision the driver actually needs for inter-tick delays.
#[cfg(any(feature = "tokio", test))]
const DRIVE_CADENCE: Duration = Duration::from_millis(10);

impl Clock {
    /// Creates a clock whose timers are driven by the Tokio runtime.
    ///
    /// A background task advances the timer registry on a coarse cadence and
    /// shuts itself down once the registry is empty and the last clock handle
    /// has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[cfg(any(feature = "tokio", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    #[must_use]
    pub fn new_tokio() -> Self {
        let system = Arc::new(SystemClock {
            timers: Mutex::new(Timers::default()),
        });

        // The driving task holds one reference; when it is the only one
        // left and no timers remain, nobody can register new work and the
        // loop ends.
        let driver = Arc::clone(&system);
        drop(tokio::spawn(async move {
            loop {
                tokio::time::sleep(DRIVE_CADENCE).await;

                let idle = driver.timers.lock().advance(Instant::now()).is_none();
                if idle && Arc::strong_count(&driver) == 1 {
                    break;
                }
            }
        }));

        Self(ClockInner::System(system))
    }

    /// Creates a frozen clock.
    ///
    /// Shorthand for `ClockControl::new().to_clock()`. The returned clock
    /// never advances; drive it through the originating [`ClockControl`]
    /// when time needs to move.
    #[cfg(any(feature = "test-util", test))]
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    #[cfg(any(feature = "test-util", test))]
    pub(crate) fn with_control(control: &ClockControl) -> Self {
        Self(ClockInner::Controlled(control.clone()))
    }

    /// Returns the current instant.
    ///
    /// Instants from the same clock are monotonic; instants from different
    /// clocks are not comparable.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockInner::System(_) => Instant::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Controlled(control) => control.instant(),
        }
    }

    /// Creates a [`Delay`] that completes after `duration`.
    #[must_use]
    pub fn delay(&self, duration: Duration) -> Delay {
        Delay::new(self, duration)
    }

    pub(crate) fn register_timer(&self, when: Instant, waker: Waker) -> TimerKey {
        match &self.0 {
            ClockInner::System(system) => system.timers.lock().register(when, waker),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Controlled(control) => control.register_timer(when, waker),
        }
    }

    pub(crate) fn unregister_timer(&self, key: TimerKey) {
        match &self.0 {
            ClockInner::System(system) => system.timers.lock().unregister(key),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Controlled(control) => control.unregister_timer(key),
        }
    }

    #[cfg(test)]
    pub(crate) fn timers_len(&self) -> usize {
        match &self.0 {
            ClockInner::System(system) => system.timers.lock().len(),
            ClockInner::Controlled(control) => control.timers_len(),
        }
    }
}

#[derive(Debug)]
struct SystemClock {
    timers: Mutex<Timers>,
}
