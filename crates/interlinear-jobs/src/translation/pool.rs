//! Bounded cooperative worker pool.
//!
//! A shared cursor over the input plus a fixed number of workers, each
//! pulling the next unclaimed item until the input is exhausted. Workers are
//! polled on the current task rather than spawned, so the items and the
//! closure may borrow from the caller.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Run `f` over `items` with at most `concurrency` calls in flight.
///
/// Results come back in input order.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }

    let slots: Vec<Mutex<Option<T>>> = items.into_iter().map(|i| Mutex::new(Some(i))).collect();
    let cursor = AtomicUsize::new(0);
    let workers = concurrency.clamp(1, len);

    let (slots, cursor, f) = (&slots, &cursor, &f);
    let runs = (0..workers).map(move |_| async move {
        let mut done = Vec::new();
        loop {
            let i = cursor.fetch_add(1, Ordering::SeqCst);
            if i >= len {
                break;
            }
            let item = slots[i]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(item) = item {
                done.push((i, f(item).await));
            }
        }
        done
    });

    let mut results: Vec<(usize, R)> = futures::future::join_all(runs)
        .await
        .into_iter()
        .flatten()
        .collect();
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}
