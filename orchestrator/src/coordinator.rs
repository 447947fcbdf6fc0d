//! Bounded concurrency for a batch of tasks.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

/// Admits at most `limit` units of work at once; the rest wait for a permit.
#[derive(Debug, Clone)]
pub struct Coordinator {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Coordinator {
    /// A limit of zero is raised to one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `f` over every item and wait for all of them.
    ///
    /// Outputs come back in submission order regardless of completion order.
    pub async fn run_batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        debug!(units = items.len(), limit = self.limit, "dispatching batch");
        let units = items.into_iter().map(|item| {
            let semaphore = Arc::clone(&self.semaphore);
            let work = f(item);
            async move {
                // The semaphore is never closed, so a permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                work.await
            }
        });
        join_all(units).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn tracked(coordinator: &Coordinator, items: Vec<u64>) -> (Vec<u64>, usize) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let out = coordinator
            .run_batch(items, |delay_ms| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    delay_ms
                }
            })
            .await;
        (out, peak.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn never_exceeds_limit_and_keeps_order() {
        let coordinator = Coordinator::new(2);
        let (out, peak) = tracked(&coordinator, vec![40, 10, 30, 20, 5, 15]).await;
        assert_eq!(out, vec![40, 10, 30, 20, 5, 15]);
        assert_eq!(peak, 2);
    }

    #[tokio::test]
    async fn limit_of_one_serializes() {
        let coordinator = Coordinator::new(1);
        let (_, peak) = tracked(&coordinator, vec![5, 5, 5]).await;
        assert_eq!(peak, 1);
    }

    #[tokio::test]
    async fn zero_limit_is_raised_to_one() {
        let coordinator = Coordinator::new(0);
        assert_eq!(coordinator.limit(), 1);
        let (out, _) = tracked(&coordinator, vec![1, 2]).await;
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        let coordinator = Coordinator::new(3);
        let out: Vec<u64> = coordinator.run_batch(Vec::new(), |x: u64| async move { x }).await;
        assert!(out.is_empty());
    }
}
