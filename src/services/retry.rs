//! Bounded exponential-backoff retry for a single fallible async operation.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

/// HTTP statuses worth retrying: rate limiting and server-side failures.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Classifies failures the executor may retry.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.backoff_multiplier)
            .with_max_times(self.max_retries)
    }
}

/// Reported before each retry sleep.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// 1-based retry number.
    pub attempt: usize,
    pub max_retries: usize,
    pub delay: Duration,
    pub error: &'a E,
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// The operation runs at most `max_retries + 1` times. Non-transient errors
/// and the last transient error are returned unchanged.
pub async fn run_with_retry<T, E, F, Fut, N>(
    operation: F,
    options: &RetryOptions,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
    N: FnMut(RetryAttempt<'_, E>),
{
    let max_retries = options.max_retries;
    let mut attempt = 0;

    operation
        .retry(options.backoff())
        .when(|err: &E| err.is_transient())
        .notify(|err: &E, delay: Duration| {
            attempt += 1;
            metrics::counter!("receipt_extraction_retries_total").increment(1);
            on_retry(RetryAttempt {
                attempt,
                max_retries,
                delay,
                error: err,
            });
        })
        .await
}
