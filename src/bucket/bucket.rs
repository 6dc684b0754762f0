//! Bucket: a named set of work items updated as concurrent chunks
//!
//! `update` moves the items out of the bucket, splits them into chunks of
//! `chunk_size`, spawns one task per chunk and, inside each chunk task, one
//! task per item. The chunk task waits for its items, the bucket waits for
//! its chunks, and only then are the items moved back in their original
//! order.

use crate::bucket::item::{BucketTag, WorkItem};
use crate::coord::types::BucketReport;
use crate::core::errors::{BucketFailure, FailureCause, ItemFailure, Result, TierError};
use crate::core::metrics::ExecutionTimer;
use crate::fanout::{into_chunks, JoinGroup, UpdateContext};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

pub struct Bucket<I> {
    tag: Arc<BucketTag>,
    items: Vec<I>,
    in_flight: bool,
}

impl<I: WorkItem> Bucket<I> {
    /// Create an empty bucket
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            tag: Arc::new(BucketTag::new(name, duration)),
            items: Vec::new(),
            in_flight: false,
        }
    }

    /// Add `count` items built by `factory`, each handed this bucket's tag
    pub fn populate<F>(&mut self, count: usize, mut factory: F) -> &mut Self
    where
        F: FnMut(Arc<BucketTag>) -> I,
    {
        self.items.reserve(count);
        for _ in 0..count {
            self.items.push(factory(self.tag.clone()));
        }
        self
    }

    /// Builder-style `populate`
    pub fn with_items<F>(mut self, count: usize, factory: F) -> Self
    where
        F: FnMut(Arc<BucketTag>) -> I,
    {
        self.populate(count, factory);
        self
    }

    pub fn push(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = I>) {
        self.items.extend(items);
    }

    pub fn tag(&self) -> Arc<BucketTag> {
        self.tag.clone()
    }

    pub fn name(&self) -> &str {
        &self.tag.name
    }

    pub fn duration(&self) -> Duration {
        self.tag.duration
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[I] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [I] {
        &mut self.items
    }

    /// True when an earlier `update` did not hand every item back, either
    /// because its future was dropped or because item tasks were lost.
    /// Further updates are refused.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Update every item once using the default chunk size
    pub async fn update(&mut self) -> Result<BucketReport> {
        self.update_with(&UpdateContext::default()).await
    }

    /// Update every item once under `ctx`.
    ///
    /// Returns after every chunk task, and every item task inside it, has
    /// completed. Item errors, panics and cancellations are collected into
    /// `TierError::Bucket` once the barrier has released.
    pub async fn update_with(&mut self, ctx: &UpdateContext) -> Result<BucketReport> {
        if self.in_flight {
            return Err(TierError::misuse(
                "bucket.update",
                format!(
                    "a previous update of bucket '{}' did not return every item",
                    self.tag.name
                ),
            ));
        }

        let timer = ExecutionTimer::start();
        let attempted = self.items.len();
        if attempted == 0 {
            debug!(bucket = %self.tag.name, "bucket empty, nothing to dispatch");
            return Ok(BucketReport {
                name: self.tag.name.clone(),
                slot: ctx.slot(),
                items: 0,
                chunk_sizes: Vec::new(),
                elapsed: timer.stop(),
            });
        }

        self.in_flight = true;
        let chunks = into_chunks(std::mem::take(&mut self.items), ctx.chunk_size());
        let chunk_sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        let chunk_indices: Vec<Vec<usize>> = chunks
            .iter()
            .map(|chunk| chunk.iter().map(|(index, _)| *index).collect())
            .collect();

        debug!(
            bucket = %self.tag.name,
            items = attempted,
            chunks = chunk_sizes.len(),
            "dispatching chunks"
        );

        let mut group = JoinGroup::new("chunk");
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            if let Some(metrics) = ctx.metrics() {
                metrics.record_chunk_dispatched();
            }
            group.spawn(run_chunk(chunk_index, chunk, ctx.clone()));
        }
        let joined = group.join().await;

        let Reassembled {
            items,
            mut failures,
        } = reassemble(&self.tag.name, attempted, &chunk_indices, joined);

        let complete = items.len() == attempted;
        self.items = items;
        self.in_flight = !complete;
        if !complete {
            error!(
                bucket = %self.tag.name,
                returned = self.items.len(),
                items = attempted,
                "items lost during update, bucket disabled"
            );
        }

        let elapsed = timer.stop();
        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            warn!(
                bucket = %self.tag.name,
                failed = failures.len(),
                items = attempted,
                "bucket finished with failures"
            );
            return Err(TierError::Bucket(BucketFailure {
                bucket: self.tag.name.clone(),
                slot: ctx.slot(),
                attempted,
                failures,
            }));
        }

        debug!(
            bucket = %self.tag.name,
            items = attempted,
            elapsed_ms = elapsed.as_millis() as u64,
            "bucket updated"
        );

        Ok(BucketReport {
            name: self.tag.name.clone(),
            slot: ctx.slot(),
            items: attempted,
            chunk_sizes,
            elapsed,
        })
    }
}

impl<I> std::fmt::Debug for Bucket<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.tag.name)
            .field("duration", &self.tag.duration)
            .field("items", &self.items.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// What one item task hands back. `item` is `None` when the task was lost.
struct ItemOutcome<I> {
    index: usize,
    item: Option<I>,
    cause: Option<FailureCause>,
}

struct Reassembled<I> {
    /// Returned items in their original order
    items: Vec<I>,
    failures: Vec<ItemFailure>,
}

/// Put joined items back in index order and collect every failure.
///
/// A lost chunk reports each of its items as `FailureCause::Lost`, so every
/// attempted index ends up either in `items` or in `failures` with a lost cause.
fn reassemble<I>(
    bucket: &str,
    attempted: usize,
    chunk_indices: &[Vec<usize>],
    joined: Vec<Result<Vec<ItemOutcome<I>>>>,
) -> Reassembled<I> {
    let mut slots: Vec<Option<I>> = (0..attempted).map(|_| None).collect();
    let mut failures = Vec::new();

    for (chunk, result) in joined.into_iter().enumerate() {
        match result {
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let Some(cause) = outcome.cause {
                        failures.push(ItemFailure {
                            bucket: bucket.to_string(),
                            index: outcome.index,
                            chunk,
                            cause,
                        });
                    }
                    if let Some(item) = outcome.item {
                        slots[outcome.index] = Some(item);
                    }
                }
            }
            Err(e) => {
                warn!(bucket, chunk, error = %e, "chunk lost");
                let message = e.to_string();
                for &index in chunk_indices.get(chunk).map(Vec::as_slice).unwrap_or(&[]) {
                    failures.push(ItemFailure {
                        bucket: bucket.to_string(),
                        index,
                        chunk,
                        cause: FailureCause::Lost(message.clone()),
                    });
                }
            }
        }
    }

    Reassembled {
        items: slots.into_iter().flatten().collect(),
        failures,
    }
}

/// One chunk: spawn a task per item and wait for all of them
async fn run_chunk<I: WorkItem>(
    chunk_index: usize,
    chunk: Vec<(usize, I)>,
    ctx: UpdateContext,
) -> Vec<ItemOutcome<I>> {
    let indices: Vec<usize> = chunk.iter().map(|(index, _)| *index).collect();
    let mut group = JoinGroup::new("item");
    for (index, item) in chunk {
        group.spawn(run_item(index, item, ctx.clone()));
    }
    let dispatched = group.dispatched();

    let outcomes: Vec<ItemOutcome<I>> = group
        .join()
        .await
        .into_iter()
        .zip(indices)
        .map(|(result, index)| match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(chunk = chunk_index, index, error = %e, "item task lost");
                if let Some(metrics) = ctx.metrics() {
                    metrics.record_item_failed();
                }
                ItemOutcome {
                    index,
                    item: None,
                    cause: Some(FailureCause::Lost(e.to_string())),
                }
            }
        })
        .collect();

    trace!(chunk = chunk_index, items = dispatched, "chunk joined");
    outcomes
}

/// One item: wait for a slot, run the update until it finishes or the pass
/// is cancelled, catch whatever it throws
async fn run_item<I: WorkItem>(index: usize, mut item: I, ctx: UpdateContext) -> ItemOutcome<I> {
    let Some(_slot) = ctx.acquire_item_slot().await else {
        if let Some(metrics) = ctx.metrics() {
            metrics.record_item_cancelled();
        }
        return ItemOutcome {
            index,
            item: Some(item),
            cause: Some(FailureCause::Cancelled),
        };
    };

    let result = {
        let _running = ctx.metrics().map(|m| m.enter_item());
        tokio::select! {
            result = AssertUnwindSafe(item.update()).catch_unwind() => Some(result),
            _ = ctx.cancel_handle().cancelled() => None,
        }
    };

    let cause = match result {
        Some(Ok(Ok(()))) => None,
        Some(Ok(Err(e))) => Some(FailureCause::Failed(format!("{:#}", e))),
        Some(Err(payload)) => Some(FailureCause::Panicked(panic_message(payload.as_ref()))),
        None => {
            trace!(index, "item update interrupted");
            Some(FailureCause::Interrupted)
        }
    };

    if let Some(metrics) = ctx.metrics() {
        match cause {
            None => metrics.record_item_updated(),
            Some(FailureCause::Interrupted) => metrics.record_item_cancelled(),
            Some(_) => metrics.record_item_failed(),
        }
    }

    ItemOutcome {
        index,
        item: Some(item),
        cause,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::sprite::Sprite;
    use anyhow::bail;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts its own updates and remembers its construction order
    struct Marker {
        id: usize,
        updates: usize,
        fail: bool,
        panic: bool,
    }

    impl Marker {
        fn new(id: usize) -> Self {
            Self {
                id,
                updates: 0,
                fail: false,
                panic: false,
            }
        }
    }

    #[async_trait]
    impl WorkItem for Marker {
        async fn update(&mut self) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            self.updates += 1;
            if self.panic {
                panic!("marker {} panicked", self.id);
            }
            if self.fail {
                bail!("marker {} failed", self.id);
            }
            Ok(())
        }
    }

    fn markers(count: usize) -> Bucket<Marker> {
        let mut bucket = Bucket::new("markers", Duration::ZERO);
        bucket.extend((0..count).map(Marker::new));
        bucket
    }

    #[tokio::test]
    async fn test_empty_bucket_completes_without_chunks() {
        let mut bucket = markers(0);
        let report = bucket.update().await.unwrap();

        assert_eq!(report.items, 0);
        assert!(report.chunk_sizes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_forty_five_items_three_chunks() {
        let mut bucket = markers(45);
        let report = bucket.update_with(&UpdateContext::new(20)).await.unwrap();

        assert_eq!(report.chunk_sizes, vec![20, 20, 5]);
        assert_eq!(report.items, 45);
        assert!(bucket.items().iter().all(|p| p.updates == 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_item_order_preserved() {
        let mut bucket = markers(33);
        bucket.update_with(&UpdateContext::new(4)).await.unwrap();

        let ids: Vec<usize> = bucket.items().iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..33).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_do_not_stop_siblings() {
        let mut bucket = markers(10);
        bucket.items_mut()[2].fail = true;
        bucket.items_mut()[7].panic = true;

        let err = bucket.update_with(&UpdateContext::new(3)).await.unwrap_err();
        let TierError::Bucket(failure) = err else {
            panic!("expected bucket failure");
        };

        assert_eq!(failure.failed_indices(), vec![2, 7]);
        assert_eq!(failure.attempted, 10);
        assert_eq!(failure.failures[0].chunk, 0);
        assert_eq!(failure.failures[1].chunk, 2);
        assert!(matches!(failure.failures[0].cause, FailureCause::Failed(_)));
        assert_eq!(
            failure.failures[1].cause,
            FailureCause::Panicked("marker 7 panicked".to_string())
        );

        // every item, including the failing ones, ran and came back
        assert_eq!(bucket.len(), 10);
        assert!(bucket.items().iter().all(|p| p.updates == 1));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_items() {
        let mut bucket = markers(5);
        let ctx = UpdateContext::new(2);
        ctx.cancel_handle().cancel();

        let err = bucket.update_with(&ctx).await.unwrap_err();
        let TierError::Bucket(failure) = err else {
            panic!("expected bucket failure");
        };

        assert_eq!(failure.cancelled_count(), 5);
        assert_eq!(bucket.len(), 5);
        assert!(bucket.items().iter().all(|p| p.updates == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_interrupts_running_items() {
        let mut bucket: Bucket<Sprite> =
            Bucket::new("stuck", Duration::from_secs(30)).with_items(6, Sprite::new);
        let ctx = UpdateContext::new(4);
        let _deadline = ctx.cancel_handle().cancel_after(Duration::from_millis(30));

        let start = std::time::Instant::now();
        let err = bucket.update_with(&ctx).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));

        let TierError::Bucket(failure) = err else {
            panic!("expected bucket failure");
        };
        assert_eq!(failure.failed_indices(), (0..6).collect::<Vec<_>>());
        assert!(failure
            .failures
            .iter()
            .all(|f| f.cause == FailureCause::Interrupted));

        // interrupted items are handed back untouched and the bucket stays usable
        assert_eq!(bucket.len(), 6);
        assert!(bucket.items().iter().all(|s| s.updates == 0));
        assert!(!bucket.is_in_flight());
    }

    #[test]
    fn test_reassemble_reports_lost_items() {
        let done = |index: usize| ItemOutcome {
            index,
            item: Some(Marker::new(index)),
            cause: None,
        };
        let joined = vec![
            Ok(vec![
                done(0),
                ItemOutcome {
                    index: 1,
                    item: None,
                    cause: Some(FailureCause::Lost("item aborted".into())),
                },
            ]),
            Err(TierError::Join {
                tier: "chunk".into(),
                message: "chunk aborted".into(),
            }),
            Ok(vec![done(4)]),
        ];
        let chunk_indices = vec![vec![0, 1], vec![2, 3], vec![4]];

        let Reassembled { items, failures } = reassemble("lossy", 5, &chunk_indices, joined);

        let ids: Vec<usize> = items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 4]);

        let mut lost: Vec<(usize, usize)> = failures
            .iter()
            .filter(|f| f.cause.is_lost())
            .map(|f| (f.index, f.chunk))
            .collect();
        lost.sort_unstable();
        assert_eq!(lost, vec![(1, 0), (2, 1), (3, 1)]);
        // every attempted index is either returned or reported
        assert_eq!(items.len() + failures.len(), 5);
    }

    #[tokio::test]
    async fn test_bucket_with_missing_items_refuses_updates() {
        let mut bucket = markers(3);
        bucket.in_flight = true;

        let err = bucket.update().await.unwrap_err();
        assert!(matches!(err, TierError::Misuse { .. }));
        assert!(bucket.items().iter().all(|p| p.updates == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sprites_read_bucket_tag() {
        let mut bucket: Bucket<Sprite> =
            Bucket::new("front", Duration::from_millis(1)).with_items(21, Sprite::new);

        bucket.update().await.unwrap();
        bucket.update().await.unwrap();

        assert!(bucket.items().iter().all(|s| s.updates == 2));
        assert!(bucket.items().iter().all(|s| s.bucket_name() == "front"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_boxed_items_mix_types() {
        struct Counter(Arc<AtomicUsize>);

        #[async_trait]
        impl WorkItem for Counter {
            async fn update(&mut self) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let mut bucket: Bucket<Box<dyn WorkItem>> = Bucket::new("mixed", Duration::ZERO);
        bucket.push(Box::new(Counter(hits.clone())));
        bucket.push(Box::new(Marker::new(1)));
        bucket.push(Box::new(Counter(hits.clone())));

        bucket.update().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
