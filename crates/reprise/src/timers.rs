// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::task::Waker;
use std::time::Instant;

/// Unique identifier for a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    at: Instant,

    /// Distinguishes timers registered for the same instant.
    seq: u32,
}

impl TimerKey {
    const fn new(at: Instant, seq: u32) -> Self {
        Self { at, seq }
    }

    /// The instant at which the timer fires.
    pub const fn at(&self) -> Instant {
        self.at
    }
}

/// Registry of one-shot timers, ordered by fire instant.
///
/// Timers never fire twice: advancing past a timer's instant removes it and
/// wakes the task that registered it. Whoever owns the registry is
/// responsible for calling [`Timers::advance`] as time moves forward; the
/// production clock does this from a runtime-driven task, and the test clock
/// does it when its control is advanced.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    wakers: BTreeMap<TimerKey, Waker>,
    last_seq: u32,
}

impl Timers {
    pub fn len(&self) -> usize {
        self.wakers.len()
    }

    #[cfg(test)]
    fn contains(&self, key: TimerKey) -> bool {
        self.wakers.contains_key(&key)
    }

    /// Registers a timer firing at `when`, returning the key under which it
    /// can later be unregistered.
    pub fn register(&mut self, when: Instant, waker: Waker) -> TimerKey {
        // Wrapping is fine: the sequence only disambiguates equal instants.
        self.last_seq = self.last_seq.wrapping_add(1);
        let key = TimerKey::new(when, self.last_seq);

        self.wakers.insert(key, waker);

        key
    }

    /// Removes a timer. Unknown keys are a no-op.
    pub fn unregister(&mut self, key: TimerKey) {
        self.wakers.remove(&key);
    }

    /// Fires every timer whose instant is at or before `now`.
    ///
    /// Returns the instant of the earliest remaining timer, or `None` when
    /// the registry is empty.
    pub fn advance(&mut self, now: Instant) -> Option<Instant> {
        while let Some(entry) = self.wakers.first_entry() {
            let at = entry.key().at();
            if at > now {
                return Some(at);
            }
            entry.remove().wake();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_instant_timers_get_distinct_keys() {
        let mut timers = Timers::default();
        let when = Instant::now() + Duration::from_secs(1);

        let key1 = timers.register(when, Waker::noop().clone());
        let key2 = timers.register(when, Waker::noop().clone());

        assert_ne!(key1, key2);
        assert_eq!(timers.len(), 2);

        timers.advance(when);
        assert_eq!(timers.len(), 0);
    }

    #[test]
    fn advance_fires_in_order() {
        let mut timers = Timers::default();
        let anchor = Instant::now();
        let first = anchor + Duration::from_secs(1);
        let second = anchor + Duration::from_secs(2);

        let key1 = timers.register(first, Waker::noop().clone());
        let key2 = timers.register(second, Waker::noop().clone());

        assert_eq!(timers.advance(anchor), Some(first));
        assert!(timers.contains(key1));

        assert_eq!(timers.advance(first), Some(second));
        assert!(!timers.contains(key1));
        assert!(timers.contains(key2));

        assert_eq!(timers.advance(second), None);
        assert_eq!(timers.len(), 0);
    }

    #[test]
    fn advance_fires_timers_at_exactly_now() {
        let mut timers = Timers::default();
        let when = Instant::now();

        let _ = timers.register(when, Waker::noop().clone());

        assert_eq!(timers.advance(when), None);
        assert_eq!(timers.len(), 0);
    }

    #[test]
    fn unregister_removes_timer() {
        let mut timers = Timers::default();
        let key = timers.register(Instant::now(), Waker::noop().clone());

        assert!(timers.contains(key));
        timers.unregister(key);
        assert!(!timers.contains(key));

        // Unregistering again is a no-op.
        timers.unregister(key);
    }

    #[test]
    fn advance_on_empty_registry() {
        let mut timers = Timers::default();

        assert_eq!(timers.advance(Instant::now()), None);
    }
}
