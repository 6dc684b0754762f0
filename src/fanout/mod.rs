//! Fan-out/join primitives used at every tier of an update pass

pub mod barrier;
pub mod context;
pub mod partition;

pub use barrier::JoinGroup;
pub use context::{CancelHandle, DeadlineGuard, ItemSlot, UpdateContext};
pub use partition::{chunk_ranges, into_chunks};
