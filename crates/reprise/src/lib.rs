// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::arithmetic_side_effects,
        clippy::unchecked_duration_subtraction,
        reason = "allow these lints in tests to improve the readability of the tests"
    )
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Drives a recurring asynchronous function.
//!
//! # Why?
//!
//! Periodic work — polling a dependency, refreshing a cache, emitting a
//! heartbeat — sounds simple until start, stop, and the work itself race
//! each other. This crate packages that concurrency contract once:
//! [`Recurring`] owns a three-state lifecycle, serializes every state
//! transition through a capacity-1 [`Throttle`], times each invocation, and
//! publishes each result through a sliding one-shot promise that observers
//! can await without missing the tick that follows.
//!
//! The pace is not fixed: after every tick a listener inspects the timed
//! result and answers with the delay before the next tick, an immediate
//! re-tick, or a stop. Retry and backoff policies therefore live in the
//! listener, not in the driver.
//!
//! # Overview
//!
//! - [`Recurring`] - The driver: start/stop lifecycle, tick execution,
//!   result publication.
//! - [`TimedResult`] - A producer outcome stamped with start and finish
//!   instants.
//! - [`Promised`] / [`Settled`] - One-shot completable observed by any
//!   number of subscribers.
//! - [`Throttle`] - FIFO serializer with fixed concurrency.
//! - [`Clock`] / [`Delay`] - Time abstraction with cancellable delays;
//!   controllable in tests through `ClockControl` (feature `test-util`).
//! - [`Spawner`] / [`ScheduledHandle`] - Runtime-agnostic forking and
//!   delayed scheduling with best-effort cancellation.
//!
//! # Example
//!
//! Poll a source five times, a second apart, then stop:
//!
//! ```
//! use std::time::Duration;
//!
//! use reprise::{BoxError, Recurring};
//!
//! # async fn example() {
//! let recurring = Recurring::new_tokio(
//!     |n| async move {
//!         // Fetch the nth sample...
//!         Ok::<_, BoxError>(n)
//!     },
//!     |n, timed| {
//!         if !timed.is_success() || n >= 4 {
//!             return Ok(None); // stop
//!         }
//!         Ok(Some(Duration::from_secs(1)))
//!     },
//! );
//!
//! recurring.start().await;
//!
//! while let Some(timed) = recurring.next_result().await.unwrap() {
//!     println!("sample {:?} took {:?}", timed.value(), timed.duration());
//! }
//! # }
//! ```
//!
//! # Testing
//!
//! With the `test-util` feature enabled (in `dev-dependencies` only), the
//! `ClockControl` type freezes the flow of time and advances it manually,
//! firing due timers as it goes. Delay-driven code under test completes
//! instantly and deterministically.

mod clock;
#[cfg(any(feature = "test-util", test))]
mod clock_control;
mod delay;
mod error;
mod promised;
mod recurring;
mod spawner;
mod throttle;
mod timed;
mod timers;

pub use clock::Clock;
#[cfg(any(feature = "test-util", test))]
pub use clock_control::ClockControl;
pub use delay::Delay;
pub use error::{BoxError, SharedError};
pub use promised::{Promised, Settled};
pub use recurring::{Recurring, State};
pub use spawner::{ScheduledHandle, Spawner};
pub use throttle::{Throttle, ThrottlePermit};
pub use timed::TimedResult;
