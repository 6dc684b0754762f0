//! Scatter-gather barrier shared by the item, chunk and bucket tiers.
//!
//! A `JoinGroup` spawns tasks onto the tokio runtime and `join()` suspends
//! until every one of them has finished. It never returns early: a task that
//! fails to join (runtime shutdown) is reported in its slot of the result
//! vector, and the remaining tasks are still awaited.

use crate::core::errors::{Result, TierError};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use tracing::trace;

pub struct JoinGroup<T> {
    tier: &'static str,
    pending: FuturesUnordered<BoxFuture<'static, (usize, Result<T>)>>,
    dispatched: usize,
}

impl<T: Send + 'static> JoinGroup<T> {
    /// `tier` names the level in logs and join errors
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            pending: FuturesUnordered::new(),
            dispatched: 0,
        }
    }

    /// Spawn `task` and return its dispatch index
    pub fn spawn<F>(&mut self, task: F) -> usize
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.dispatched;
        self.dispatched += 1;

        let tier = self.tier;
        let handle = tokio::spawn(task);
        self.pending.push(
            async move { (index, handle.await.map_err(|e| TierError::join(tier, e))) }.boxed(),
        );
        index
    }

    /// Tasks spawned so far
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Tasks that have not signalled completion yet
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every spawned task. Results are in dispatch order.
    pub async fn join(mut self) -> Vec<Result<T>> {
        let mut slots: Vec<Option<Result<T>>> = (0..self.dispatched).map(|_| None).collect();

        while let Some((index, result)) = self.pending.next().await {
            trace!(
                tier = self.tier,
                index,
                outstanding = self.pending.len(),
                "task joined"
            );
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(TierError::internal("join slot left unfilled")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_group_joins_immediately() {
        let group: JoinGroup<()> = JoinGroup::new("item");
        assert_eq!(group.outstanding(), 0);
        assert!(group.join().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_waits_for_every_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = JoinGroup::new("item");

        for i in 0..16u64 {
            let done = done.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(16 - i)).await;
                done.fetch_add(1, Ordering::SeqCst);
                i
            });
        }
        assert_eq!(group.dispatched(), 16);

        let results = group.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 16);

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_short_circuit() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut group = JoinGroup::new("chunk");

        group.spawn(async {
            panic!("chunk exploded");
        });
        for _ in 0..3 {
            let done = done.clone();
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        let results = group.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 4);
        match &results[0] {
            Err(TierError::Join { tier, .. }) => assert_eq!(tier, "chunk"),
            other => panic!("expected join error, got {:?}", other),
        }
        assert!(results[1..].iter().all(|r| r.is_ok()));
    }
}
