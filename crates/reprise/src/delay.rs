// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::Clock;
use crate::timers::TimerKey;

/// A future that completes after a duration has elapsed on its [`Clock`].
///
/// The timer is registered lazily on first poll and unregistered when the
/// delay is dropped, so an abandoned delay leaves nothing behind in the
/// clock's registry. Precision is bounded by whatever drives the clock;
/// the only guarantee is that the delay does not complete early.
///
/// A zero duration completes immediately without touching the registry. A
/// duration that would overflow the clock's instant never completes.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use reprise::{Clock, Delay};
///
/// # async fn example(clock: &Clock) {
/// Delay::new(clock, Duration::from_millis(10)).await;
/// # }
/// ```
#[derive(Debug)]
pub struct Delay {
    clock: Clock,
    duration: Duration,
    // Registered on first poll, cleared on completion.
    timer: Option<TimerKey>,
}

impl Delay {
    /// Creates a delay completing `duration` after the first poll.
    ///
    /// Consider [`Clock::delay`] as a shortcut.
    #[must_use]
    pub fn new(clock: &Clock, duration: Duration) -> Self {
        Self {
            clock: clock.clone(),
            duration,
            timer: None,
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match this.timer {
            None if this.duration == Duration::MAX => Poll::Pending,
            None if this.duration.is_zero() => Poll::Ready(()),
            None => match this.clock.instant().checked_add(this.duration) {
                Some(when) => {
                    this.timer = Some(this.clock.register_timer(when, cx.waker().clone()));
                    Poll::Pending
                }
                None => {
                    // Past the maximum representable instant; never completes.
                    this.duration = Duration::MAX;
                    Poll::Pending
                }
            },
            Some(key) if key.at() <= this.clock.instant() => {
                this.timer = None;

                // The poll may have been explicit rather than waker-driven,
                // in which case the registry still holds the timer.
                this.clock.unregister_timer(key);

                Poll::Ready(())
            }
            Some(_) => Poll::Pending,
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let Some(key) = self.timer {
            self.clock.unregister_timer(key);
        }
    }
}
