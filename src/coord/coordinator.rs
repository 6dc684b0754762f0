//! Coordinator - the top tier of an update pass
//!
//! Owns the registered buckets in slot order. `update_all` spawns one task
//! per bucket, in ascending slot order, and returns once every bucket task
//! (and every chunk and item task beneath it) has finished.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bucket::{Bucket, WorkItem};
use crate::coord::types::{BucketReport, CoordinatorState, Slot, UpdateReport};
use crate::core::config::EngineConfig;
use crate::core::errors::{Result, TierError};
use crate::core::metrics::{ExecutionTimer, MetricsSnapshot, UpdateMetrics};
use crate::fanout::{CancelHandle, JoinGroup, UpdateContext};

pub struct Coordinator<I> {
    buckets: Vec<Bucket<I>>,
    config: EngineConfig,
    state: CoordinatorState,
    cancel: CancelHandle,
    metrics: Arc<UpdateMetrics>,
}

impl<I: WorkItem> Coordinator<I> {
    /// Create a coordinator with the default configuration
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
            config: EngineConfig::default(),
            state: CoordinatorState::Idle,
            cancel: CancelHandle::new(),
            metrics: Arc::new(UpdateMetrics::new()),
        }
    }

    /// Create a coordinator with a validated configuration
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Register `bucket` at the next slot.
    ///
    /// Buckets are moved in, so the same bucket can never be registered
    /// twice. Two buckets sharing a name are not detected here. While a pass
    /// is unfinished the bucket cannot be stored: it is logged and dropped.
    /// Use `try_register` to get the bucket back instead.
    pub fn register(&mut self, bucket: Bucket<I>) -> &mut Self {
        if let Err(rejected) = self.try_store(bucket, false) {
            warn!(
                bucket = %rejected.bucket.name(),
                error = %rejected.error,
                "register ignored, bucket dropped"
            );
        }
        self
    }

    /// Builder-style `register`
    pub fn with_bucket(mut self, bucket: Bucket<I>) -> Self {
        self.register(bucket);
        self
    }

    /// Register `bucket`, rejecting a repeated name or a non-idle coordinator.
    /// A rejected bucket is handed back inside the error.
    pub fn try_register(
        &mut self,
        bucket: Bucket<I>,
    ) -> std::result::Result<Slot, RegisterError<I>> {
        self.try_store(bucket, true)
    }

    fn try_store(
        &mut self,
        bucket: Bucket<I>,
        unique_names: bool,
    ) -> std::result::Result<Slot, RegisterError<I>> {
        if self.state != CoordinatorState::Idle {
            return Err(RegisterError {
                error: TierError::misuse(
                    "coordinator.register",
                    "cannot register while a pass is unfinished",
                ),
                bucket,
            });
        }
        if unique_names {
            if let Some(slot) = self.slot_of(bucket.name()) {
                return Err(RegisterError {
                    error: TierError::DuplicateBucket {
                        name: bucket.name().to_string(),
                        slot,
                    },
                    bucket,
                });
            }
        }
        let slot = self.buckets.len();
        debug!(slot, bucket = %bucket.name(), "bucket registered");
        self.buckets.push(bucket);
        Ok(slot)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Slot of the first bucket called `name`
    pub fn slot_of(&self, name: &str) -> Option<Slot> {
        self.buckets.iter().position(|b| b.name() == name)
    }

    pub fn bucket(&self, slot: Slot) -> Option<&Bucket<I>> {
        self.buckets.get(slot)
    }

    pub fn bucket_mut(&mut self, slot: Slot) -> Option<&mut Bucket<I>> {
        self.buckets.get_mut(slot)
    }

    /// Registered buckets in ascending slot order
    pub fn buckets(&self) -> impl Iterator<Item = (Slot, &Bucket<I>)> {
        self.buckets.iter().enumerate()
    }

    /// Handle that cancels the running pass, or the next one if tripped while idle
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cumulative counters across every pass so far
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Update every item of every registered bucket exactly once.
    ///
    /// Bucket tasks are started in slot order; completion order is
    /// unspecified. A failing bucket never stops its siblings: all failures
    /// are gathered into `TierError::Update` after the last bucket joins.
    pub async fn update_all(&mut self) -> Result<UpdateReport> {
        if self.state != CoordinatorState::Idle {
            return Err(TierError::misuse(
                "coordinator.update_all",
                "a previous pass did not complete or lost items; buckets are no longer intact",
            ));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = ExecutionTimer::start();

        if self.buckets.is_empty() {
            debug!(%run_id, "no buckets registered, pass is a no-op");
            self.cancel.reset();
            let elapsed = timer.stop();
            self.metrics.record_pass(elapsed);
            return Ok(UpdateReport {
                run_id,
                started_at,
                elapsed,
                buckets: Vec::new(),
            });
        }

        self.state = CoordinatorState::Updating;

        let mut ctx = UpdateContext::from_config(&self.config).with_cancel(self.cancel.clone());
        if self.config.enable_metrics {
            ctx = ctx.with_metrics(self.metrics.clone());
        }
        let deadline = ctx.arm_deadline();

        let buckets = std::mem::take(&mut self.buckets);
        info!(
            %run_id,
            buckets = buckets.len(),
            chunk_size = ctx.chunk_size(),
            "update pass started"
        );

        let mut group = JoinGroup::new("bucket");
        for (slot, mut bucket) in buckets.into_iter().enumerate() {
            let ctx = ctx.for_slot(slot);
            if let Some(metrics) = ctx.metrics() {
                metrics.record_bucket_dispatched();
            }
            group.spawn(async move {
                let result = bucket.update_with(&ctx).await;
                (bucket, result)
            });
        }
        let joined = group.join().await;
        drop(deadline);

        let mut reports: Vec<BucketReport> = Vec::with_capacity(joined.len());
        let mut failures = Vec::new();
        let mut fatal: Option<TierError> = None;
        let mut intact = true;

        for (slot, result) in joined.into_iter().enumerate() {
            match result {
                Ok((bucket, outcome)) => {
                    match outcome {
                        Ok(report) => reports.push(report),
                        Err(TierError::Bucket(failure)) => failures.push(failure),
                        Err(e) => {
                            warn!(slot, bucket = %bucket.name(), error = %e, "bucket update errored");
                            fatal.get_or_insert(e);
                        }
                    }
                    if bucket.is_in_flight() {
                        error!(slot, bucket = %bucket.name(), "bucket lost items");
                        intact = false;
                    }
                    self.buckets.push(bucket);
                }
                Err(e) => {
                    error!(slot, error = %e, "bucket task lost");
                    intact = false;
                    fatal.get_or_insert(e);
                }
            }
        }

        let elapsed = timer.stop();
        self.metrics.record_pass(elapsed);
        self.cancel.reset();
        if intact {
            self.state = CoordinatorState::Idle;
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if !failures.is_empty() {
            warn!(
                %run_id,
                failed_buckets = failures.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "update pass finished with failures"
            );
            return Err(TierError::Update { failures });
        }

        let report = UpdateReport {
            run_id,
            started_at,
            elapsed,
            buckets: reports,
        };
        info!(
            %run_id,
            items = report.total_items(),
            chunks = report.total_chunks(),
            elapsed_ms = elapsed.as_millis() as u64,
            "update pass complete"
        );
        Ok(report)
    }
}

/// A bucket `try_register` refused, handed back with the reason
pub struct RegisterError<I> {
    pub error: TierError,
    pub bucket: Bucket<I>,
}

impl<I> RegisterError<I> {
    /// Take the rejected bucket back
    pub fn into_bucket(self) -> Bucket<I> {
        self.bucket
    }
}

impl<I> std::fmt::Debug for RegisterError<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterError")
            .field("error", &self.error)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl<I: WorkItem> std::fmt::Display for RegisterError<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bucket '{}' not registered: {}", self.bucket.name(), self.error)
    }
}

impl<I: WorkItem> std::error::Error for RegisterError<I> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<I> From<RegisterError<I>> for TierError {
    fn from(rejected: RegisterError<I>) -> Self {
        rejected.error
    }
}

impl<I: WorkItem> Default for Coordinator<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> std::fmt::Debug for Coordinator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("buckets", &self.buckets)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Sprite;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sprites(name: &str, count: usize) -> Bucket<Sprite> {
        Bucket::new(name, Duration::ZERO).with_items(count, Sprite::new)
    }

    #[test]
    fn test_registration_assigns_dense_slots() {
        let mut coord = Coordinator::new();
        coord
            .register(sprites("back", 1))
            .register(sprites("mid", 1))
            .register(sprites("front", 1));

        let names: Vec<(Slot, &str)> = coord.buckets().map(|(s, b)| (s, b.name())).collect();
        assert_eq!(names, vec![(0, "back"), (1, "mid"), (2, "front")]);
        assert_eq!(coord.slot_of("front"), Some(2));
    }

    #[test]
    fn test_try_register_rejects_duplicate_names() {
        let mut coord = Coordinator::new();
        assert_eq!(coord.try_register(sprites("front", 1)).unwrap(), 0);

        let err = coord.try_register(sprites("front", 2)).unwrap_err();
        assert!(matches!(err.error, TierError::DuplicateBucket { slot: 0, .. }));
        assert_eq!(coord.len(), 1);

        // the rejected bucket comes back intact
        let bucket = err.into_bucket();
        assert_eq!(bucket.name(), "front");
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn test_register_error_converts_to_tier_error() {
        let mut coord = Coordinator::new().with_bucket(sprites("mid", 1));
        let converted: TierError = coord.try_register(sprites("mid", 1)).unwrap_err().into();
        assert_eq!(converted.category(), "duplicate");
    }

    #[test]
    fn test_with_config_validates() {
        let config = EngineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(Coordinator::<Sprite>::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_empty_coordinator_returns_immediately() {
        let mut coord: Coordinator<Sprite> = Coordinator::new();
        let report = coord.update_all().await.unwrap();

        assert!(report.buckets.is_empty());
        assert_eq!(coord.state(), CoordinatorState::Idle);
        assert_eq!(coord.metrics().passes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reports_follow_slot_order() {
        let mut coord = Coordinator::new()
            .with_bucket(sprites("back", 3))
            .with_bucket(sprites("mid", 45))
            .with_bucket(sprites("front", 0));

        let report = coord.update_all().await.unwrap();

        let order: Vec<(&str, Option<Slot>)> = report
            .buckets
            .iter()
            .map(|b| (b.name.as_str(), b.slot))
            .collect();
        assert_eq!(order, vec![("back", Some(0)), ("mid", Some(1)), ("front", Some(2))]);
        assert_eq!(report.bucket("mid").unwrap().chunk_sizes, vec![20, 20, 5]);
        assert_eq!(report.total_items(), 48);
    }

    #[tokio::test]
    async fn test_cancel_while_idle_applies_to_next_pass_only() {
        let mut coord = Coordinator::new().with_bucket(sprites("front", 4));
        coord.cancel_handle().cancel();

        let err = coord.update_all().await.unwrap_err();
        assert_eq!(err.item_failures().len(), 4);
        assert!(err.item_failures().iter().all(|f| f.cause.is_cancelled()));

        // the signal was consumed by the cancelled pass
        let report = coord.update_all().await.unwrap();
        assert_eq!(report.total_items(), 4);
        assert!(coord.bucket(0).unwrap().items().iter().all(|s| s.updates == 1));
    }
}
