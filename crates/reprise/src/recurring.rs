// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{Level, event};

use crate::{BoxError, Clock, Promised, ScheduledHandle, SharedError, Spawner, Throttle, TimedResult};

/// Lifecycle state of a [`Recurring`] driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No tick is running and no timer is armed. Initial state.
    Stopped,
    /// A tick is currently running the producer.
    Executing,
    /// The previous tick has returned and the next one is armed, either on
    /// a timer or queued for immediate execution.
    Pending,
}

type Producer<T> = Box<dyn Fn(u64) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;
type Listener<T> = Box<dyn Fn(u64, &TimedResult<T>) -> Result<Option<Duration>, BoxError> + Send + Sync>;
type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Repeatedly drives an asynchronous producer, timing every invocation and
/// letting a listener decide how long to wait before the next one.
///
/// Each *tick* invokes the producer with the invocation index (0-based),
/// awaits its future, stamps start and finish instants into a
/// [`TimedResult`], and hands that result to the listener. The listener
/// returns `Ok(Some(delay))` to schedule the next tick, `Ok(Some(ZERO))` to
/// re-tick immediately without consulting the scheduler, `Ok(None)` to stop,
/// or `Err(_)` to stop with an error.
///
/// A producer error does not stop the driver: the error travels inside the
/// timed result and the listener still decides what happens next. Only a
/// listener or lifecycle-hook failure reaches the error channel of the
/// next-result promise.
///
/// Between [`start`][Recurring::start] and [`stop`][Recurring::stop], ticks
/// are strictly sequential; a shared capacity-1 [`Throttle`] serializes
/// start, stop, and every tick's bookkeeping against each other. Cloning the
/// driver yields another handle to the same underlying state.
///
/// # Observing results
///
/// [`next_result`][Recurring::next_result] resolves with the upcoming tick's
/// timed result. The driver swaps in a fresh promise *before* notifying the
/// current one, so an observer that awaits tick N can immediately
/// re-subscribe and receive tick N + 1. Results are not buffered: a slow
/// observer misses intermediate ticks and can only consult
/// [`previous_result`][Recurring::previous_result] for the latest one.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use reprise::{BoxError, Recurring};
///
/// # async fn example() {
/// let recurring = Recurring::new_tokio(
///     |n| async move { Ok::<_, BoxError>(n * 2) },
///     |n, _timed| Ok((n < 3).then_some(Duration::from_millis(10))),
/// );
///
/// recurring.start().await;
///
/// let first = recurring.next_result().await.unwrap().unwrap();
/// assert_eq!(first.value(), Some(&0));
/// # }
/// ```
pub struct Recurring<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    spawner: Spawner,
    clock: Clock,
    producer: Producer<T>,
    listener: Listener<T>,

    // Serializes start, stop, and tick bookkeeping; the only
    // cross-operation happens-before edge the driver relies on.
    throttle: Throttle,

    // Total ticks started, including one currently executing. Never reset.
    counter: AtomicU64,

    shared: Mutex<Shared<T>>,
}

struct Shared<T> {
    state: State,
    next_result: Promised<TimedResult<T>>,
    previous_result: Option<TimedResult<T>>,
    // Armed only in the pending state when a non-zero delay was requested.
    timer: Option<ScheduledHandle>,
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
}

impl<T> Clone for Recurring<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Recurring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recurring")
            .field("state", &self.inner.shared.lock().state)
            .field("invocations", &self.inner.counter.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T> Recurring<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a driver from an execution controller, a clock, a producer,
    /// and a listener.
    ///
    /// The driver starts out stopped, with its next-result promise already
    /// settled empty so that early subscribers are not left waiting on a
    /// tick that may never fire.
    pub fn new<P, F, E, L>(spawner: Spawner, clock: Clock, producer: P, listener: L) -> Self
    where
        P: Fn(u64) -> F + Send + Sync + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
        L: Fn(u64, &TimedResult<T>) -> Result<Option<Duration>, BoxError> + Send + Sync + 'static,
    {
        let producer: Producer<T> = Box::new(move |n| {
            let producing = producer(n);
            async move { producing.await.map_err(Into::into) }.boxed()
        });

        Self {
            inner: Arc::new(Inner {
                spawner,
                clock,
                producer,
                listener: Box::new(listener),
                throttle: Throttle::new(1),
                counter: AtomicU64::new(0),
                shared: Mutex::new(Shared {
                    state: State::Stopped,
                    next_result: Promised::completed(),
                    previous_result: None,
                    timer: None,
                    on_start: None,
                    on_stop: None,
                }),
            }),
        }
    }

    /// Creates a driver on the ambient Tokio runtime.
    ///
    /// Shorthand for [`Recurring::new`] with [`Spawner::new_tokio`] and
    /// [`Clock::new_tokio`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[cfg(any(feature = "tokio", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    pub fn new_tokio<P, F, E, L>(producer: P, listener: L) -> Self
    where
        P: Fn(u64) -> F + Send + Sync + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
        L: Fn(u64, &TimedResult<T>) -> Result<Option<Duration>, BoxError> + Send + Sync + 'static,
    {
        Self::new(Spawner::new_tokio(), Clock::new_tokio(), producer, listener)
    }

    /// Replaces the hook run when the driver starts.
    ///
    /// Callable at any time; takes effect on the next start. A failing hook
    /// aborts the start: the driver returns to stopped and the failure is
    /// delivered through the next-result promise installed by that start.
    pub fn on_start<H, F>(&self, hook: H) -> &Self
    where
        H: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner.shared.lock().on_start = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Replaces the hook run when a pending driver is stopped.
    ///
    /// Callable at any time; takes effect on the next stop that finds the
    /// driver pending. A failing hook is delivered through the error channel
    /// of the current next-result promise; the driver stops either way.
    pub fn on_stop<H, F>(&self, hook: H) -> &Self
    where
        H: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner.shared.lock().on_stop = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Starts the driver.
    ///
    /// A no-op when the driver is already executing or pending. Otherwise
    /// installs a fresh next-result promise, runs the start hook, and forks
    /// the first tick. Serialized against [`stop`][Recurring::stop] and
    /// against tick bookkeeping.
    pub async fn start(&self) {
        let _permit = self.inner.throttle.acquire().await;

        let hook = {
            let mut shared = self.inner.shared.lock();
            if shared.state != State::Stopped {
                return;
            }
            shared.next_result = Promised::new();
            shared.state = State::Executing;
            shared.on_start.clone()
        };

        event!(Level::DEBUG, "recurring function starting");

        match run_hook(hook).await {
            Ok(()) => self.inner.fork(),
            Err(error) => {
                event!(Level::DEBUG, %error, "start hook failed; stopping");
                let mut shared = self.inner.shared.lock();
                shared.state = State::Stopped;
                shared.next_result.fail(error.into());
            }
        }
    }

    /// Stops the driver.
    ///
    /// From the pending state this cancels the armed timer (best-effort),
    /// runs the stop hook, and settles the current next-result promise:
    /// empty on success, with the hook's error on failure.
    ///
    /// From the executing state the in-flight tick cannot be aborted; it
    /// observes the stopped state at its next checkpoint, schedules nothing
    /// further, and performs the stop cleanup itself (so the stop hook runs
    /// exactly once either way). From the stopped state this is a no-op.
    pub async fn stop(&self) {
        let _permit = self.inner.throttle.acquire().await;

        let (previous, timer, hook, promised) = {
            let mut shared = self.inner.shared.lock();
            let previous = shared.state;
            shared.state = State::Stopped;
            (
                previous,
                shared.timer.take(),
                shared.on_stop.clone(),
                shared.next_result.clone(),
            )
        };

        if previous != State::Pending {
            return;
        }

        if let Some(timer) = timer {
            // Best-effort: a timer that already fired parks its tick behind
            // the throttle, where the preamble sees the stopped state.
            let _ = timer.cancel();
        }

        event!(Level::DEBUG, "recurring function stopping");

        match run_hook(hook).await {
            Ok(()) => promised.complete(),
            Err(error) => {
                event!(Level::DEBUG, %error, "stop hook failed");
                promised.fail(error.into());
            }
        }
    }

    /// Resolves with the next tick's timed result.
    ///
    /// The promise is captured when this method is called: subscribers
    /// calling between ticks receive the upcoming tick, and subscribers
    /// calling during a tick receive that tick's result. `Ok(None)` means
    /// the driver settled quietly (stopped, or not yet started); `Err(_)`
    /// carries a listener or hook failure.
    pub fn next_result(
        &self,
    ) -> impl Future<Output = Result<Option<TimedResult<T>>, SharedError>> + Send + use<T> {
        let promised = self.inner.shared.lock().next_result.clone();
        async move { promised.wait().await.into_result() }
    }

    /// The most recently completed tick's timed result, or `None` before
    /// the first tick completes.
    #[must_use]
    pub fn previous_result(&self) -> Option<TimedResult<T>> {
        self.inner.shared.lock().previous_result.clone()
    }

    /// Total number of ticks started, including one currently executing.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.inner.counter.load(Ordering::Acquire)
    }

    /// The driver's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.shared.lock().state
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Forks a tick onto a fresh logical execution.
    fn fork(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.spawner.spawn(inner.tick());
    }

    fn tick(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
        let producing;
        let n;
        let started_at;
        {
            let permit = self.throttle.acquire().await;
            {
                let mut shared = self.shared.lock();
                if shared.state == State::Stopped {
                    // Stopped while this tick was queued. No counter
                    // increment, no producer call. The stop path settles the
                    // promise except when stop landed between the fork and
                    // this preamble; settle quietly then so observers are
                    // not stranded.
                    if !shared.next_result.is_settled() {
                        shared.next_result.complete();
                    }
                    return;
                }
                shared.timer = None;
                shared.state = State::Executing;
            }

            started_at = self.clock.instant();
            n = self.counter.fetch_add(1, Ordering::AcqRel);
            producing = (self.producer)(n);
            drop(permit);
        }

        event!(Level::TRACE, invocation = n, "tick executing");

        // The producer runs outside the throttle so that a concurrent stop
        // observes an executing tick instead of queueing behind it.
        let outcome = producing.await;

        let _permit = self.throttle.acquire().await;
        let finished_at = self.clock.instant();
        let timed = TimedResult::new(outcome.map_err(SharedError::from), started_at, finished_at);

        // Publish the result, then swap in a fresh promise before notifying
        // so an observer of this tick can re-subscribe and catch the next
        // one.
        let snapshot = {
            let mut shared = self.shared.lock();
            shared.previous_result = Some(timed.clone());
            mem::replace(&mut shared.next_result, Promised::new())
        };

        match (self.listener)(n, &timed) {
            Err(error) => {
                event!(Level::DEBUG, invocation = n, %error, "listener failed; stopping");
                {
                    let mut shared = self.shared.lock();
                    shared.state = State::Stopped;
                    shared.next_result.complete();
                }
                // The error belongs to the observer awaiting this tick.
                snapshot.fail(error.into());
            }
            Ok(delay) => {
                snapshot.succeed(timed);

                let stopped = self.shared.lock().state == State::Stopped;
                if stopped {
                    // stop() won while the producer was in flight. Stopping
                    // an executing tick defers the stop cleanup to this
                    // checkpoint: run the stop hook exactly once and settle
                    // the freshly-installed promise. The listener's delay is
                    // ignored; nothing further is scheduled.
                    event!(Level::DEBUG, invocation = n, "recurring function stopping");

                    let (hook, promised) = {
                        let shared = self.shared.lock();
                        (shared.on_stop.clone(), shared.next_result.clone())
                    };
                    match run_hook(hook).await {
                        Ok(()) => promised.complete(),
                        Err(error) => {
                            event!(Level::DEBUG, %error, "stop hook failed");
                            promised.fail(error.into());
                        }
                    }
                    return;
                }

                let mut shared = self.shared.lock();
                match delay {
                    None => {
                        shared.state = State::Stopped;
                        shared.next_result.complete();
                    }
                    Some(delay) if delay.is_zero() => {
                        shared.state = State::Pending;
                        drop(shared);
                        self.fork();
                    }
                    Some(delay) => {
                        shared.state = State::Pending;
                        drop(shared);

                        let next = Arc::clone(&self);
                        let timer = self
                            .spawner
                            .spawn_after(&self.clock, delay, next.tick());
                        self.shared.lock().timer = Some(timer);
                    }
                }
            }
        }
        }
        .boxed()
    }
}

async fn run_hook(hook: Option<Hook>) -> Result<(), BoxError> {
    match hook {
        Some(hook) => hook().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen_driver() -> Recurring<u64> {
        Recurring::new(
            Spawner::new_tokio(),
            Clock::new_frozen(),
            |n| async move { Ok::<_, BoxError>(n) },
            |_, _| Ok(None),
        )
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Recurring<u64>: Send, Sync, Clone);
        static_assertions::assert_impl_all!(State: Send, Sync, Copy);
    }

    #[test]
    fn new_driver_is_stopped() {
        let recurring = frozen_driver();

        assert_eq!(recurring.state(), State::Stopped);
        assert_eq!(recurring.invocations(), 0);
        assert!(recurring.previous_result().is_none());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn initial_next_result_is_settled_empty() {
        let recurring = frozen_driver();

        assert!(recurring.next_result().await.unwrap().is_none());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn stop_on_stopped_driver_is_noop() {
        let recurring = frozen_driver();
        let stops = Arc::new(AtomicU64::new(0));

        let hook_stops = Arc::clone(&stops);
        recurring.on_stop(move || {
            let hook_stops = Arc::clone(&hook_stops);
            async move {
                hook_stops.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        });

        recurring.stop().await;

        assert_eq!(recurring.state(), State::Stopped);
        assert_eq!(stops.load(Ordering::Acquire), 0);
    }

    #[test]
    fn debug_output_names_the_state() {
        let recurring = frozen_driver();

        let rendered = format!("{recurring:?}");
        assert!(rendered.contains("Stopped"));
        assert!(rendered.contains("invocations"));
    }
}
