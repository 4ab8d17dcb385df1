// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use crate::SharedError;

/// The timed outcome of a single invocation: the producer's result plus the
/// instants at which the invocation started and finished.
///
/// A producer error is data, not an exceptional path: the timed result still
/// carries both instants, with the error in place of the value.
///
/// # Examples
///
/// ```
/// use reprise::TimedResult;
///
/// # fn example(timed: &TimedResult<u64>) {
/// if let Some(value) = timed.value() {
///     println!("produced {value} in {:?}", timed.duration());
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TimedResult<T> {
    result: Result<T, SharedError>,
    started_at: Instant,
    finished_at: Instant,
}

impl<T> TimedResult<T> {
    pub(crate) fn new(result: Result<T, SharedError>, started_at: Instant, finished_at: Instant) -> Self {
        Self {
            result,
            started_at,
            finished_at,
        }
    }

    /// The invocation's outcome: the produced value or the producer's error.
    pub fn result(&self) -> Result<&T, &SharedError> {
        self.result.as_ref()
    }

    /// The produced value, when the invocation succeeded.
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The producer's error, when the invocation failed.
    pub fn error(&self) -> Option<&SharedError> {
        self.result.as_ref().err()
    }

    /// Whether the invocation produced a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The instant at which the invocation started.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The instant at which the invocation finished.
    #[must_use]
    pub fn finished_at(&self) -> Instant {
        self.finished_at
    }

    /// How long the invocation took.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }

    /// Consumes the timed result, returning the inner outcome.
    pub fn into_result(self) -> Result<T, SharedError> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::BoxError;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(TimedResult<u32>: Send, Sync, Clone);
    }

    #[test]
    fn success_accessors() {
        let started = Instant::now();
        let finished = started + Duration::from_millis(250);
        let timed = TimedResult::new(Ok(42), started, finished);

        assert!(timed.is_success());
        assert_eq!(timed.value(), Some(&42));
        assert!(timed.error().is_none());
        assert_eq!(timed.started_at(), started);
        assert_eq!(timed.finished_at(), finished);
        assert_eq!(timed.duration(), Duration::from_millis(250));
        assert_eq!(timed.into_result().unwrap(), 42);
    }

    #[test]
    fn failure_accessors() {
        let started = Instant::now();
        let error: SharedError = Arc::from(BoxError::from("boom"));
        let timed = TimedResult::<u32>::new(Err(error), started, started);

        assert!(!timed.is_success());
        assert!(timed.value().is_none());
        assert_eq!(timed.error().unwrap().to_string(), "boom");
        assert_eq!(timed.duration(), Duration::ZERO);
        assert!(timed.into_result().is_err());
    }
}
