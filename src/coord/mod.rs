//! Coordinator-based update passes
//!
//! The coordinator owns buckets in registration order and drives one
//! concurrent update pass over all of them at a time.

pub mod coordinator;
pub mod types;

pub use coordinator::*;
pub use types::*;
