use crate::core::errors::{Result, TierError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Items per chunk when nothing else is configured
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Engine configuration shared by every bucket a coordinator drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of items dispatched together as one chunk
    pub chunk_size: usize,
    /// Cap on item updates running at once across the whole pass (None = unbounded)
    pub max_in_flight_items: Option<usize>,
    /// Pass-wide deadline in milliseconds; items not started by then are skipped
    pub deadline_ms: Option<u64>,
    /// Collect counters in `UpdateMetrics`
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight_items: None,
            deadline_ms: None,
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TierError::configuration_field(
                "chunk_size must be greater than 0",
                "chunk_size",
            ));
        }
        if self.max_in_flight_items == Some(0) {
            return Err(TierError::configuration_field(
                "max_in_flight_items must be greater than 0 when set",
                "max_in_flight_items",
            ));
        }
        if self.deadline_ms == Some(0) {
            return Err(TierError::configuration_field(
                "deadline_ms must be greater than 0 when set",
                "deadline_ms",
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Small chunks and a tight bound, handy when stepping through a pass
    pub fn development() -> Self {
        Self {
            chunk_size: 4,
            max_in_flight_items: Some(8),
            deadline_ms: Some(10_000),
            ..Default::default()
        }
    }

    /// Unbounded fan-out with a generous deadline so a stuck item cannot hang a tick forever
    pub fn production() -> Self {
        Self {
            deadline_ms: Some(60_000),
            ..Default::default()
        }
    }

    /// Larger chunks, fewer barrier layers, no metric counters
    pub fn high_throughput() -> Self {
        Self {
            chunk_size: 256,
            enable_metrics: false,
            ..Default::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TierError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&contents)
    }
}

/// Whole milliseconds covering `deadline`; only a zero duration maps to 0
fn deadline_millis(deadline: Duration) -> u64 {
    u64::try_from(deadline.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn max_in_flight_items(mut self, limit: Option<usize>) -> Self {
        self.config.max_in_flight_items = limit;
        self
    }

    /// Set the pass deadline, rounded up to whole milliseconds
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.deadline_ms = deadline.map(deadline_millis);
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
