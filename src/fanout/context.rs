//! Per-pass state threaded through the bucket, chunk and item tiers.

use crate::core::config::{EngineConfig, DEFAULT_CHUNK_SIZE};
use crate::core::metrics::UpdateMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Clonable handle that trips cancellation for a pass.
///
/// Items that have not started yet are skipped. Running item updates are
/// dropped at their next await point and the item is handed back untouched.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip cancellation
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clear a tripped signal so the next pass starts fresh
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once cancellation has been tripped
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so wait_for cannot fail here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Trip cancellation once `deadline` elapses, unless the guard is dropped first
    pub fn cancel_after(&self, deadline: Duration) -> DeadlineGuard {
        let handle = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            debug!(deadline_ms = deadline.as_millis() as u64, "pass deadline reached");
            handle.cancel();
        });
        DeadlineGuard { timer }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the pending deadline timer on drop
pub struct DeadlineGuard {
    timer: JoinHandle<()>,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Shared state for one update pass
#[derive(Clone)]
pub struct UpdateContext {
    chunk_size: usize,
    deadline: Option<Duration>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancelHandle,
    metrics: Option<Arc<UpdateMetrics>>,
    slot: Option<usize>,
}

impl UpdateContext {
    /// Unbounded context with no deadline and no metrics
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            deadline: None,
            permits: None,
            cancel: CancelHandle::new(),
            metrics: None,
            slot: None,
        }
    }

    /// Context carrying the limits from `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut ctx = Self::new(config.chunk_size);
        ctx.deadline = config.deadline();
        ctx.permits = config
            .max_in_flight_items
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        ctx
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<UpdateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cap concurrent item updates for every tier using this context
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// Copy of this context tagged with a coordinator slot
    pub fn for_slot(&self, slot: usize) -> Self {
        let mut ctx = self.clone();
        ctx.slot = Some(slot);
        ctx
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn metrics(&self) -> Option<&UpdateMetrics> {
        self.metrics.as_deref()
    }

    /// Start the deadline timer, if this context has a deadline
    pub fn arm_deadline(&self) -> Option<DeadlineGuard> {
        self.deadline.map(|deadline| self.cancel.cancel_after(deadline))
    }

    /// Wait for an item slot.
    ///
    /// Returns `None` when the pass is cancelled before a slot frees up.
    /// Unbounded contexts hand out a placeholder immediately.
    pub async fn acquire_item_slot(&self) -> Option<ItemSlot> {
        if self.is_cancelled() {
            return None;
        }
        let Some(permits) = self.permits.clone() else {
            return Some(ItemSlot { _permit: None });
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = permits.acquire_owned() => {
                // the semaphore is never closed
                permit.ok().map(|p| ItemSlot { _permit: Some(p) })
            }
        }
    }
}

impl Default for UpdateContext {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Permission to run one item update; releases its permit on drop
pub struct ItemSlot {
    _permit: Option<OwnedSemaphorePermit>,
}
