//! Concurrency-Controlled Batch Executor
//!
//! The only place in the pipeline where bounded concurrency happens.
//! Everywhere else — module to module, locale to locale, batch to batch —
//! execution is strictly sequential, because later phases depend on mapper
//! files written by earlier ones and the destination stack's rate limits
//! are global.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// One item's failure inside a batch
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub item_id: String,
    pub message: String,
}

impl BatchFailure {
    pub fn new(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a batch run: per-item successes and failures, never a
/// propagated exception
#[derive(Debug)]
pub struct BatchReport<T> {
    pub successes: Vec<T>,
    pub failures: Vec<BatchFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn merge(&mut self, other: BatchReport<T>) {
        self.successes.extend(other.successes);
        self.failures.extend(other.failures);
    }
}

/// Run `handler` over every item with at most `limit` futures in flight.
///
/// Guarantees: each item's handler is invoked exactly once; one item's
/// failure never stops sibling handlers from starting or completing; the
/// returned future resolves only after every handler has settled. No
/// completion-order guarantee is made.
pub async fn run_batched<I, T, F, Fut>(items: Vec<I>, limit: usize, handler: F) -> BatchReport<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, BatchFailure>>,
{
    let results: Vec<Result<T, BatchFailure>> = stream::iter(items.into_iter().map(handler))
        .buffer_unordered(limit.max(1))
        .collect()
        .await;

    let mut report = BatchReport::default();
    for result in results {
        match result {
            Ok(value) => report.successes.push(value),
            Err(failure) => report.failures.push(failure),
        }
    }
    report
}
