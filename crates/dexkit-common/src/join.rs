//! Named join strategies for fan-out fetches.
//!
//! Two deliberately distinct patterns:
//!
//! - [`join_all_settled`]: best-effort. Every future runs to completion and
//!   failures are collected alongside successes. Used by the background sync
//!   batch, where one bad detail record must not abort the rest.
//! - [`join_all_or_fail`]: fail-fast. The first error aborts the whole join.
//!   Used by the application's page load, where a partial page is worse than
//!   a retryable error.

use futures::future;
use std::future::Future;

/// Outcome of a best-effort join.
#[derive(Debug)]
pub struct Settled<T, E> {
    /// Successful values, in input order.
    pub ok: Vec<T>,
    /// Errors from the futures that failed.
    pub errors: Vec<E>,
}

impl<T, E> Settled<T, E> {
    /// True when every future succeeded.
    pub fn all_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run all futures to completion, collecting successes and failures.
pub async fn join_all_settled<T, E, I, F>(futures: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let results = future::join_all(futures).await;

    let mut ok = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(err) => errors.push(err),
        }
    }

    Settled { ok, errors }
}

/// Run all futures in parallel; the first error fails the whole join.
pub async fn join_all_or_fail<T, E, I, F>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    future::try_join_all(futures).await
}
