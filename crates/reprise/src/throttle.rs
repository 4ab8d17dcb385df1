// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;

use event_listener::Event;
use parking_lot::Mutex;

/// A FIFO serializer with fixed concurrency.
///
/// Work submitted to the throttle is admitted in strict submission order,
/// with at most `capacity` units in flight at once. A capacity of 1 gives
/// strict mutual exclusion: every acquirer observes the effects of every
/// earlier acquirer.
///
/// Acquisition is cancellation-safe: dropping a pending [`Throttle::acquire`]
/// future removes its place in the queue without blocking later submissions.
///
/// # Examples
///
/// ```
/// use reprise::Throttle;
///
/// # async fn example() {
/// let throttle = Throttle::new(1);
///
/// let result = throttle.run(async { 2 + 2 }).await;
/// assert_eq!(result, 4);
/// # }
/// ```
#[derive(Debug)]
pub struct Throttle {
    capacity: usize,
    state: Mutex<TicketState>,
    turn: Event,
}

#[derive(Debug, Default)]
struct TicketState {
    next_ticket: u64,
    queue: VecDeque<u64>,
    active: usize,
}

impl Throttle {
    /// Creates a throttle admitting at most `capacity` units of work at once.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "throttle capacity must be at least 1");

        Self {
            capacity,
            state: Mutex::new(TicketState::default()),
            turn: Event::new(),
        }
    }

    /// Waits for this submission's turn, returning a permit that holds the
    /// slot until dropped.
    pub async fn acquire(&self) -> ThrottlePermit<'_> {
        let ticket = {
            let mut state = self.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(ticket);
            ticket
        };

        let mut enlisted = Enlisted {
            throttle: self,
            ticket,
            admitted: false,
        };

        loop {
            if self.try_admit(ticket) {
                enlisted.admitted = true;
                return ThrottlePermit { throttle: self };
            }

            // Register before re-checking so a release between the check
            // and the await is not lost.
            let listener = self.turn.listen();

            if self.try_admit(ticket) {
                enlisted.admitted = true;
                return ThrottlePermit { throttle: self };
            }

            listener.await;
        }
    }

    /// Runs `work` under the throttle, forwarding its output.
    pub async fn run<F: Future>(&self, work: F) -> F::Output {
        let _permit = self.acquire().await;
        work.await
    }

    /// Admits the ticket if it is at the head of the queue and a slot is
    /// free. Only the head is ever admitted, which is what preserves
    /// submission order.
    fn try_admit(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        if state.active < self.capacity && state.queue.front() == Some(&ticket) {
            state.queue.pop_front();
            state.active += 1;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// Holds one of a [`Throttle`]'s slots; dropping it releases the slot and
/// wakes queued submissions.
#[derive(Debug)]
pub struct ThrottlePermit<'a> {
    throttle: &'a Throttle,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.throttle.state.lock();
            state.active -= 1;
        }
        self.throttle.turn.notify(usize::MAX);
    }
}

/// Tracks a submission from enlistment to admission so that an abandoned
/// acquire does not wedge the queue behind its ticket.
struct Enlisted<'a> {
    throttle: &'a Throttle,
    ticket: u64,
    admitted: bool,
}

impl Drop for Enlisted<'_> {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }

        {
            let mut state = self.throttle.state.lock();
            if let Some(position) = state.queue.iter().position(|&t| t == self.ticket) {
                state.queue.remove(position);
            }
        }

        // Removing the head may unblock the next ticket.
        self.throttle.turn.notify(usize::MAX);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Throttle: Send, Sync);
    }

    #[test]
    #[should_panic(expected = "throttle capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _ = Throttle::new(0);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn run_forwards_output() {
        let throttle = Throttle::new(1);

        assert_eq!(throttle.run(async { "out" }).await, "out");
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_one_serializes() {
        let throttle = Arc::new(Throttle::new(1));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let throttle = Arc::clone(&throttle);
            let in_flight = Arc::clone(&in_flight);
            let overlaps = Arc::clone(&overlaps);

            tasks.push(tokio::spawn(async move {
                throttle
                    .run(async {
                        if in_flight.fetch_add(1, Ordering::AcqRel) > 0 {
                            overlaps.fetch_add(1, Ordering::AcqRel);
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                    })
                    .await;
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::Acquire), 0);
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn admissions_preserve_submission_order() {
        let throttle = Arc::new(Throttle::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the slot so every subsequent submission queues.
        let gate = throttle.acquire().await;

        let mut tasks = Vec::new();
        for i in 0..8_usize {
            let task_throttle = Arc::clone(&throttle);
            let order = Arc::clone(&order);

            tasks.push(tokio::spawn(async move {
                let _permit = task_throttle.acquire().await;
                order.lock().push(i);
            }));

            // Make sure task i has enlisted before task i + 1 is spawned.
            while throttle.queued() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(gate);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn abandoned_acquire_releases_its_place() {
        let throttle = Arc::new(Throttle::new(1));

        let gate = throttle.acquire().await;

        // Enlist a waiter, then abandon it.
        let abandoned = {
            let throttle = Arc::clone(&throttle);
            tokio::spawn(async move {
                let _permit = throttle.acquire().await;
                std::future::pending::<()>().await;
            })
        };
        while throttle.queued() < 1 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        drop(gate);

        // The abandoned ticket must not block this acquire.
        let _permit = throttle.acquire().await;
    }
}
