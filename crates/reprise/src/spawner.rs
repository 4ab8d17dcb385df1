// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use event_listener::Event;
use futures::FutureExt;
use futures::future::{self, BoxFuture, Either};

use crate::{Clock, Delay};

/// Runtime-agnostic execution controller.
///
/// A spawner forks work onto fresh logical executions so that callers return
/// promptly, and schedules work to run after a delay with best-effort
/// cancellation. Use [`Spawner::new_tokio`] for the Tokio runtime, or
/// [`Spawner::new_custom`] to plug in any executor that can run a boxed
/// future.
///
/// # Examples
///
/// ```
/// use reprise::Spawner;
///
/// # async fn example() {
/// let spawner = Spawner::new_tokio();
/// spawner.spawn(async {
///     // runs on its own task
/// });
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Spawner(SpawnerKind);

#[derive(Debug, Clone)]
enum SpawnerKind {
    #[cfg(any(feature = "tokio", test))]
    Tokio,
    Custom(CustomSpawner),
}

#[derive(Clone)]
struct CustomSpawner(Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>);

impl fmt::Debug for CustomSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomSpawner")
    }
}

impl Spawner {
    /// Creates a spawner that forks tasks onto the Tokio runtime.
    ///
    /// # Panics
    ///
    /// Spawning panics if no Tokio runtime context is available at that
    /// point.
    #[cfg(any(feature = "tokio", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    #[must_use]
    pub fn new_tokio() -> Self {
        Self(SpawnerKind::Tokio)
    }

    /// Creates a spawner from a closure that runs a boxed future.
    ///
    /// The closure is responsible for handing the future to an executor;
    /// the spawner itself makes no assumptions about threading beyond the
    /// future being `Send`.
    pub fn new_custom<F>(spawn: F) -> Self
    where
        F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
    {
        Self(SpawnerKind::Custom(CustomSpawner(Arc::new(spawn))))
    }

    /// Forks `work` onto a fresh logical execution, fire-and-forget.
    pub fn spawn(&self, work: impl Future<Output = ()> + Send + 'static) {
        match &self.0 {
            #[cfg(any(feature = "tokio", test))]
            SpawnerKind::Tokio => drop(tokio::spawn(work)),
            SpawnerKind::Custom(custom) => (custom.0)(work.boxed()),
        }
    }

    /// Schedules `work` to run once `delay` has elapsed on `clock`.
    ///
    /// The returned handle cancels the pending callback on a best-effort
    /// basis: cancellation after the delay has elapsed has no effect, and
    /// callers must tolerate a callback that fires anyway.
    pub fn spawn_after(
        &self,
        clock: &Clock,
        delay: Duration,
        work: impl Future<Output = ()> + Send + 'static,
    ) -> ScheduledHandle {
        let shared = Arc::new(CancelShared {
            cancelled: AtomicBool::new(false),
            begun: AtomicBool::new(false),
            event: Event::new(),
        });

        let delay = Delay::new(clock, delay);
        let task_shared = Arc::clone(&shared);
        self.spawn(async move {
            let cancelled = pin!(task_shared.wait_cancelled());
            let delay = pin!(delay);

            match future::select(delay, cancelled).await {
                Either::Left(((), _)) => {
                    task_shared.begun.store(true, Ordering::Release);
                    work.await;
                }
                Either::Right(((), _)) => {}
            }
        });

        ScheduledHandle { shared }
    }
}

/// Handle to a callback scheduled through [`Spawner::spawn_after`].
#[derive(Debug)]
pub struct ScheduledHandle {
    shared: Arc<CancelShared>,
}

impl ScheduledHandle {
    /// Requests cancellation of the pending callback.
    ///
    /// Returns `true` when this call was the first cancellation request and
    /// the callback had not yet begun running. A `false` return does not
    /// guarantee the callback ran; cancellation is best-effort either way.
    pub fn cancel(&self) -> bool {
        let first = !self.shared.cancelled.swap(true, Ordering::AcqRel);
        self.shared.event.notify(usize::MAX);

        first && !self.shared.begun.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct CancelShared {
    cancelled: AtomicBool,
    begun: AtomicBool,
    event: Event,
}

impl CancelShared {
    async fn wait_cancelled(&self) {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return;
            }

            // Register before re-checking so a notification between the
            // check and the await is not lost.
            let listener = self.event.listen();

            if self.cancelled.load(Ordering::Acquire) {
                return;
            }

            listener.await;
        }
    }
}
