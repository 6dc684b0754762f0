//! Work item contract
//!
//! Items are moved into their own task for the duration of an update and
//! moved back on join, so `update` gets exclusive access to the item and
//! nothing else. Shared, read-only bucket data travels in a `BucketTag`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read-only data every item of a bucket can see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTag {
    pub name: String,
    /// Simulated cost of updating one item
    pub duration: Duration,
}

impl BucketTag {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

/// A unit of work updated once per pass
#[async_trait]
pub trait WorkItem: Send + 'static {
    /// Update this item in place.
    ///
    /// Must finish in bounded time. An error or a panic is reported for this
    /// item only; sibling items are unaffected.
    async fn update(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: WorkItem + ?Sized> WorkItem for Box<T> {
    async fn update(&mut self) -> anyhow::Result<()> {
        (**self).update().await
    }
}
