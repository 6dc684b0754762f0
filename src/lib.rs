//! # tierflow
//!
//! Two-tier chunked fan-out/join for updating bucketed work items once per
//! tick.
//!
//! A [`Coordinator`] owns [`Bucket`]s in registration order. Each pass spawns
//! one task per bucket; every bucket splits its items into chunks and spawns
//! one task per chunk; every chunk spawns one task per item. Each tier waits
//! for all of its tasks before returning, so `update_all` completes only once
//! every item has been updated.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tierflow::{Bucket, Coordinator, Sprite};
//!
//! #[tokio::main]
//! async fn main() -> tierflow::Result<()> {
//!     let mut coordinator = Coordinator::new();
//!     coordinator
//!         .register(Bucket::new("back", Duration::ZERO).with_items(20, Sprite::new))
//!         .register(Bucket::new("front", Duration::ZERO).with_items(20, Sprite::new));
//!
//!     let report = coordinator.update_all().await?;
//!     assert_eq!(report.total_items(), 40);
//!     Ok(())
//! }
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod metrics;
}

pub mod bucket; // Work items and the buckets that own them
pub mod coord; // Top-level coordinator
pub mod fanout; // Scatter-gather barrier, chunking, per-pass context

// Re-exports for convenience
pub use bucket::{spawn_sprites, Bucket, BucketTag, Sprite, WorkItem};
pub use coord::{
    BucketReport, Coordinator, CoordinatorState, RegisterError, Slot, UpdateReport,
};
pub use crate::core::config::{EngineConfig, EngineConfigBuilder, DEFAULT_CHUNK_SIZE};
pub use crate::core::errors::{BucketFailure, FailureCause, ItemFailure, Result, TierError};
pub use crate::core::metrics::{MetricsSnapshot, UpdateMetrics};
pub use fanout::{CancelHandle, JoinGroup, UpdateContext};
