// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, OnceLock};

use event_listener::Event;

use crate::SharedError;

/// A one-shot completable observed by any number of subscribers.
///
/// A `Promised` starts pending and is settled exactly once, with a value,
/// with an error, or with an empty completion. Subscribers call
/// [`Promised::wait`] and receive the terminal [`Settled`] outcome whether
/// they subscribed before or after settlement. Clones share the same
/// underlying slot.
///
/// Settling twice is a programming error and panics.
///
/// # Examples
///
/// ```
/// use reprise::{Promised, Settled};
///
/// # async fn example() {
/// let promised = Promised::new();
/// let observer = promised.clone();
///
/// promised.succeed(7);
///
/// assert!(matches!(observer.wait().await, Settled::Value(7)));
/// # }
/// ```
#[derive(Debug)]
pub struct Promised<T> {
    shared: Arc<Shared<T>>,
}

#[derive(Debug)]
struct Shared<T> {
    // Written once by whoever settles, then read lock-free by subscribers.
    slot: OnceLock<Settled<T>>,
    ready: Event,
}

/// Terminal outcome of a [`Promised`].
#[derive(Debug, Clone)]
pub enum Settled<T> {
    /// Settled with a value.
    Value(T),
    /// Settled with an empty completion: no value, no error.
    Empty,
    /// Settled with an error.
    Failed(SharedError),
}

impl<T> Settled<T> {
    /// Converts the outcome into a result: `Ok(Some(_))` for a value,
    /// `Ok(None)` for an empty completion, `Err(_)` for an error.
    pub fn into_result(self) -> Result<Option<T>, SharedError> {
        match self {
            Self::Value(value) => Ok(Some(value)),
            Self::Empty => Ok(None),
            Self::Failed(error) => Err(error),
        }
    }
}

impl<T> Default for Promised<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promised<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Promised<T> {
    /// Creates a pending `Promised`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: OnceLock::new(),
                ready: Event::new(),
            }),
        }
    }

    /// Creates a `Promised` that is already settled with an empty
    /// completion.
    #[must_use]
    pub fn completed() -> Self {
        let promised = Self::new();
        promised.complete();
        promised
    }

    /// Settles with a value.
    ///
    /// # Panics
    ///
    /// Panics if the `Promised` was already settled.
    pub fn succeed(&self, value: T) {
        self.settle(Settled::Value(value));
    }

    /// Settles with an error.
    ///
    /// # Panics
    ///
    /// Panics if the `Promised` was already settled.
    pub fn fail(&self, error: SharedError) {
        self.settle(Settled::Failed(error));
    }

    /// Settles with an empty completion.
    ///
    /// # Panics
    ///
    /// Panics if the `Promised` was already settled.
    pub fn complete(&self) {
        self.settle(Settled::Empty);
    }

    /// Whether the `Promised` has been settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.slot.get().is_some()
    }

    fn settle(&self, outcome: Settled<T>) {
        assert!(
            self.shared.slot.set(outcome).is_ok(),
            "promised was already settled"
        );
        self.shared.ready.notify(usize::MAX);
    }
}

impl<T: Clone> Promised<T> {
    /// Waits for the terminal outcome.
    ///
    /// Resolves immediately when the `Promised` is already settled. Every
    /// subscriber observes the same outcome.
    pub async fn wait(&self) -> Settled<T> {
        loop {
            // Fast path: already settled.
            if let Some(outcome) = self.shared.slot.get() {
                return outcome.clone();
            }

            // Register before re-checking so a settlement between the check
            // and the await is not lost.
            let listener = self.shared.ready.listen();

            if let Some(outcome) = self.shared.slot.get() {
                return outcome.clone();
            }

            listener.await;
        }
    }
}
