// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

/// A boxed error produced by user-supplied producers, listeners, and
/// lifecycle hooks.
///
/// The driver never inspects these errors; it only moves them. Producer
/// errors travel inside a [`TimedResult`][crate::TimedResult], while listener
/// and hook errors travel on the error channel of the next-result promise.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A reference-counted error that can be delivered to any number of
/// observers of the same promise.
///
/// Errors are shared rather than cloned because `dyn Error` is not `Clone`;
/// every observer of a settled [`Promised`][crate::Promised] receives the
/// same underlying error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_error_converts_to_shared() {
        let boxed: BoxError = "boom".into();
        let shared: SharedError = boxed.into();

        assert_eq!(shared.to_string(), "boom");
    }

    #[test]
    fn shared_error_is_cheap_to_clone() {
        let shared: SharedError = Arc::from(BoxError::from("boom"));
        let other = Arc::clone(&shared);

        assert!(Arc::ptr_eq(&shared, &other));
    }
}
