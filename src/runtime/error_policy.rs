//! # Error Policy
//!
//! Requeue policy for failed reconciles. Each resource keeps its own Fibonacci
//! backoff so one failing object never delays retries of another.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube_runtime::controller::Action;
use tracing::{error, info, warn};

use crate::constants::{
    DEFAULT_FAILURE_REQUEUE_SECS, ERROR_BACKOFF_MAX_MINUTES, ERROR_BACKOFF_MIN_MINUTES,
};
use crate::error::Error;
use crate::observability::metrics;

/// Fibonacci sequence of retry delays in minutes, capped at `max_minutes`
///
/// With the default bounds the sequence is 1m, 1m, 2m, 3m, 5m, 8m, 10m, 10m, ...
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    previous: u64,
    current: u64,
    error_count: u32,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            min_minutes,
            max_minutes: max_minutes.max(min_minutes),
            previous: 0,
            current: min_minutes,
            error_count: 0,
        }
    }

    pub fn next_backoff_seconds(&mut self) -> u64 {
        let minutes = self.current.min(self.max_minutes);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        self.error_count = self.error_count.saturating_add(1);
        minutes * 60
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.min_minutes, self.max_minutes);
    }
}

/// Backoff state per `namespace/name`
#[derive(Debug, Default)]
pub struct BackoffStates {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffStates {
    /// Next delay for `key` and the number of consecutive errors so far
    pub fn next(&self, key: &str) -> Option<(u64, u32)> {
        match self.states.lock() {
            Ok(mut states) => {
                let backoff = states.entry(key.to_string()).or_insert_with(|| {
                    FibonacciBackoff::new(ERROR_BACKOFF_MIN_MINUTES, ERROR_BACKOFF_MAX_MINUTES)
                });
                let seconds = backoff.next_backoff_seconds();
                Some((seconds, backoff.error_count()))
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {e}, using default backoff");
                None
            }
        }
    }

    /// Forget the error history of `key`, after a successful reconcile or once
    /// the object is gone
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}

pub fn resource_key(namespace: Option<&str>, name: Option<&str>) -> String {
    format!(
        "{}/{}",
        namespace.unwrap_or("default"),
        name.unwrap_or("unknown")
    )
}

/// Log a reconcile error and decide when to retry
pub fn handle_reconciliation_error(
    controller: &str,
    key: &str,
    error: &Error,
    backoffs: &BackoffStates,
) -> Action {
    let error_span = tracing::error_span!(
        "controller.reconciliation_error",
        controller,
        resource = key,
        error = %error
    );
    let _guard = error_span.enter();

    error!("Reconciliation error for {key}: {error:?}");
    metrics::increment_reconciliation_errors(controller, error.as_str());

    let (seconds, error_count) = backoffs
        .next(key)
        .unwrap_or((DEFAULT_FAILURE_REQUEUE_SECS, 0));

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000));
    info!(
        "🔄 Retrying with Fibonacci backoff: {seconds}s (error count: {error_count}, trigger source: error-backoff)"
    );
    info!(
        "📅 Next retry scheduled: {} (in {seconds}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339()
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_sequence_is_capped() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let minutes: Vec<u64> = (0..8).map(|_| backoff.next_backoff_seconds() / 60).collect();
        assert_eq!(minutes, vec![1, 1, 2, 3, 5, 8, 10, 10]);
        assert_eq!(backoff.error_count(), 8);

        backoff.reset();
        assert_eq!(backoff.error_count(), 0);
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }

    #[test]
    fn test_backoff_is_tracked_per_resource() {
        let states = BackoffStates::default();
        assert_eq!(states.next("kcp-system/a"), Some((60, 1)));
        assert_eq!(states.next("kcp-system/a"), Some((60, 2)));
        assert_eq!(states.next("kcp-system/a"), Some((120, 3)));
        assert_eq!(states.next("kcp-system/b"), Some((60, 1)));

        states.reset("kcp-system/a");
        assert_eq!(states.next("kcp-system/a"), Some((60, 1)));
    }

    #[test]
    fn test_error_policy_requeues_with_backoff() {
        let states = BackoffStates::default();
        let err = Error::invariant("two secrets");
        let first = handle_reconciliation_error("gardener-cluster", "ns/gc", &err, &states);
        assert_eq!(first, Action::requeue(Duration::from_secs(60)));
        handle_reconciliation_error("gardener-cluster", "ns/gc", &err, &states);
        let third = handle_reconciliation_error("gardener-cluster", "ns/gc", &err, &states);
        assert_eq!(third, Action::requeue(Duration::from_secs(120)));
    }

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key(Some("kcp-system"), Some("rt")), "kcp-system/rt");
        assert_eq!(resource_key(None, None), "default/unknown");
    }
}
