//! Report and state types for coordinator passes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Registration index of a bucket; dense from 0 in registration order
pub type Slot = usize;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// No pass running; buckets may be registered
    Idle,
    /// A pass is running, or one was abandoned before it finished
    Updating,
}

/// Outcome of one successful bucket update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketReport {
    pub name: String,
    pub slot: Option<Slot>,
    /// Items updated
    pub items: usize,
    /// Size of every chunk dispatched, in dispatch order
    pub chunk_sizes: Vec<usize>,
    pub elapsed: Duration,
}

impl BucketReport {
    pub fn chunks(&self) -> usize {
        self.chunk_sizes.len()
    }
}

/// Outcome of one successful `update_all` pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One report per bucket, in slot order
    pub buckets: Vec<BucketReport>,
}

impl UpdateReport {
    pub fn total_items(&self) -> usize {
        self.buckets.iter().map(|b| b.items).sum()
    }

    pub fn total_chunks(&self) -> usize {
        self.buckets.iter().map(BucketReport::chunks).sum()
    }

    /// Find a bucket's report by name
    pub fn bucket(&self, name: &str) -> Option<&BucketReport> {
        self.buckets.iter().find(|b| b.name == name)
    }
}
