use std::path::PathBuf;
use std::time::Duration;

use crate::buffer::BufferFlags;

/// Errors raised by [`BufferPool`](crate::BufferPool).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Non-blocking acquire found no available buffer.
    #[error("buffer pool exhausted ({size} buffers, none available)")]
    Exhausted { size: usize },

    /// Blocking acquire gave up.
    #[error("no buffer became available within {0:?}")]
    Timeout(Duration),

    /// The buffer was created by a different pool.
    #[error("buffer {buffer_id} belongs to pool {owner}, not pool {pool}")]
    ForeignBuffer { buffer_id: u32, owner: u64, pool: u64 },

    /// Data does not fit in the buffer.
    #[error("{len} bytes do not fit in a {capacity}-byte buffer")]
    BufferOverflow { len: usize, capacity: usize },
}

/// Errors reported by a [`HardwarePort`](crate::HardwarePort).
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The port is disabled and cannot take buffers.
    #[error("port is disabled")]
    PortDisabled,

    /// The component refused an operation.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// The component signalled end of stream.
    #[error("end of stream")]
    EndOfStream,

    /// The component failed asynchronously.
    #[error("component error: {0}")]
    Component(String),

    #[error("hardware I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Split-delivery protocol violations.
#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    /// A second split-begin arrived while one was outstanding.
    #[error("unexpected split begin: pending {pending:?}, incoming {incoming:?}")]
    UnexpectedSplitBegin {
        pending: BufferFlags,
        incoming: BufferFlags,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// A frame to hold is larger than the scratch arena.
    #[error("frame of {len} bytes exceeds retention scratch of {capacity} bytes")]
    ScratchOverflow { len: usize, capacity: usize },
}

/// Control-channel parse errors. Never fatal; the line is ignored.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed command line {0:?} (expected key=value)")]
    Malformed(String),

    #[error("unknown command key {0:?}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Any error that stops a stream.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transport error: {0}")]
    Transport(#[from] camstream_transport::TransportError),

    #[error("framing error: {0}")]
    Frame(#[from] camstream_frame::FrameError),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),

    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("control error: {0}")]
    Control(#[from] ControlError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Transport(_) => "transport",
            PipelineError::Frame(_) => "framing",
            PipelineError::Pool(_) => "pool",
            PipelineError::Reassembly(_) => "reassembly",
            PipelineError::Retention(_) => "retention",
            PipelineError::Hardware(_) => "hardware",
            PipelineError::Control(_) => "control",
            PipelineError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
