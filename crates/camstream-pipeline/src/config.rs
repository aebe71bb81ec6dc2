use std::path::Path;
use std::time::Duration;

use camstream_frame::{FrameConfig, FramingPolicy, DEFAULT_CONFIG_HEADER_LIMIT};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::motion::MacroblockGrid;
use crate::pool::AcquireMode;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_BUFFER_COUNT: usize = 2;
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_RETENTION_THRESHOLD: u8 = 5;
pub const DEFAULT_SCRATCH_CAPACITY: usize = 256_000;

/// Buffer pool shape and acquire behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub buffer_count: usize,
    pub buffer_size: usize,
    /// Wait for a buffer instead of failing when the pool is empty.
    pub blocking_acquire: bool,
    /// Bound on a blocking acquire; `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            blocking_acquire: false,
            acquire_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn acquire_mode(&self) -> AcquireMode {
        if self.blocking_acquire {
            AcquireMode::Blocking {
                timeout: self.acquire_timeout_ms.map(Duration::from_millis),
            }
        } else {
            AcquireMode::NonBlocking
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    /// Motion above this score is persisted.
    pub threshold: u8,
    /// Bytes reserved for the held frame.
    pub scratch_capacity: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_RETENTION_THRESHOLD,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
        }
    }
}

/// Everything a stream needs besides its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub framing: FramingPolicy,
    pub pool: PoolConfig,
    pub retention: RetentionConfig,
    /// Request motion vectors from the encoder at startup.
    pub motion_vectors: bool,
    /// Typed framing sends an alarm when motion exceeds this; 0 disables.
    pub alarm_threshold: u8,
    pub config_header_limit: u32,
    /// Annotate frames with running statistics.
    pub show_stats: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framing: FramingPolicy::default(),
            pool: PoolConfig::default(),
            retention: RetentionConfig::default(),
            motion_vectors: false,
            alarm_threshold: 0,
            config_header_limit: DEFAULT_CONFIG_HEADER_LIMIT,
            show_stats: false,
        }
    }
}

impl StreamConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.pool.buffer_count == 0 {
            return Err(ConfigError::Invalid("pool.buffer_count must be at least 1".into()));
        }
        if self.pool.buffer_size == 0 {
            return Err(ConfigError::Invalid("pool.buffer_size must be non-zero".into()));
        }
        if self.retention.enabled && self.retention.scratch_capacity == 0 {
            return Err(ConfigError::Invalid(
                "retention.scratch_capacity must be non-zero when retention is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Whether the motion side channel should be on at startup.
    pub fn side_channel_enabled(&self) -> bool {
        self.motion_vectors || self.retention.enabled || self.alarm_threshold != 0
    }

    pub fn grid(&self) -> MacroblockGrid {
        MacroblockGrid::for_resolution(self.width, self.height)
    }

    /// Wire framing configuration for this stream.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            policy: self.framing,
            config_header_limit: self.config_header_limit,
            max_payload_size: self.max_frame_size(),
            ..FrameConfig::default()
        }
    }

    /// Largest logical frame: one split-begin plus its end buffer.
    pub fn max_frame_size(&self) -> usize {
        self.pool.buffer_size.saturating_mul(2)
    }
}
