use std::fmt;
use thiserror::Error;

/// Why a single work item did not complete its update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// `update()` returned an error
    Failed(String),
    /// `update()` panicked; the payload message if it was a string
    Panicked(String),
    /// The pass was cancelled before the item started
    Cancelled,
    /// The pass was cancelled while `update()` was running; the update was dropped
    Interrupted,
    /// The item's task could not be joined, so the item itself is gone
    Lost(String),
}

impl FailureCause {
    /// True for items cut short by cancellation, whether or not they had started
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Interrupted)
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Lost(_))
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "failed: {}", msg),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
            Self::Cancelled => write!(f, "cancelled before start"),
            Self::Interrupted => write!(f, "interrupted by cancellation"),
            Self::Lost(msg) => write!(f, "lost: {}", msg),
        }
    }
}

/// A work item that did not complete its update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub bucket: String,
    /// Position of the item inside its bucket
    pub index: usize,
    /// Chunk the item was dispatched in
    pub chunk: usize,
    pub cause: FailureCause,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {} of bucket '{}' (chunk {}) {}",
            self.index, self.bucket, self.chunk, self.cause
        )
    }
}

/// Item failures aggregated at the bucket barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFailure {
    pub bucket: String,
    /// Registration slot, when the bucket was updated through a coordinator
    pub slot: Option<usize>,
    /// Number of items the bucket dispatched
    pub attempted: usize,
    pub failures: Vec<ItemFailure>,
}

impl BucketFailure {
    /// Indices of the failed items, ascending
    pub fn failed_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.failures.iter().map(|f| f.index).collect();
        indices.sort_unstable();
        indices
    }

    pub fn cancelled_count(&self) -> usize {
        self.failures.iter().filter(|f| f.cause.is_cancelled()).count()
    }

    /// Items that never came back to the bucket
    pub fn lost_count(&self) -> usize {
        self.failures.iter().filter(|f| f.cause.is_lost()).count()
    }
}

impl fmt::Display for BucketFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket '{}' had {} of {} items fail",
            self.bucket,
            self.failures.len(),
            self.attempted
        )?;
        if let Some(slot) = self.slot {
            write!(f, " (slot {})", slot)?;
        }
        Ok(())
    }
}

/// Unified error type for tierflow
#[derive(Debug, Error)]
pub enum TierError {
    /// One or more items in a bucket failed; siblings still ran to completion
    #[error("{0}")]
    Bucket(BucketFailure),

    /// One or more buckets failed during a coordinator pass
    #[error("Update pass failed: {} bucket(s) reported failures", failures.len())]
    Update { failures: Vec<BucketFailure> },

    /// A caller contract was broken
    #[error("Misuse: {operation} - {message}")]
    Misuse { operation: String, message: String },

    /// A bucket name was registered twice through the checked path
    #[error("Bucket '{name}' is already registered at slot {slot}")]
    DuplicateBucket { name: String, slot: usize },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A spawned task could not be joined (runtime shutting down)
    #[error("Join failed at {tier} tier: {message}")]
    Join { tier: String, message: String },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TierError {
    /// Create a misuse error
    pub fn misuse<S: Into<String>, M: Into<String>>(operation: S, message: M) -> Self {
        Self::Misuse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a join error
    pub fn join<S: Into<String>>(tier: S, err: tokio::task::JoinError) -> Self {
        Self::Join {
            tier: tier.into(),
            message: err.to_string(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Every item failure carried by this error, across buckets
    pub fn item_failures(&self) -> Vec<&ItemFailure> {
        match self {
            Self::Bucket(bucket) => bucket.failures.iter().collect(),
            Self::Update { failures } => failures.iter().flat_map(|b| b.failures.iter()).collect(),
            _ => Vec::new(),
        }
    }

    /// Check if calling the operation again may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Bucket(_) | Self::Update { .. } => true,
            Self::Join { .. } | Self::Io { .. } => true,
            Self::Misuse { .. } | Self::DuplicateBucket { .. } => false,
            Self::Configuration { .. } | Self::Serialization { .. } => false,
            Self::Internal { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Bucket(_) => "bucket",
            Self::Update { .. } => "update",
            Self::Misuse { .. } => "misuse",
            Self::DuplicateBucket { .. } => "duplicate",
            Self::Configuration { .. } => "configuration",
            Self::Join { .. } => "join",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TierError>;

impl From<std::io::Error> for TierError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_yaml::Error> for TierError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<anyhow::Error> for TierError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<BucketFailure> for TierError {
    fn from(failure: BucketFailure) -> Self {
        Self::Bucket(failure)
    }
}
