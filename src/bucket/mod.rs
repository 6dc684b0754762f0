//! Buckets and the work items they own

pub mod bucket;
pub mod item;
pub mod sprite;

pub use bucket::Bucket;
pub use item::{BucketTag, WorkItem};
pub use sprite::{spawn_sprites, Sprite};
