use std::fmt;
use std::io;

use camstream_frame::FrameError;
use camstream_pipeline::{ConfigError, PipelineError};
use camstream_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const FRAMING_ERROR: i32 = 4;
pub const POOL_ERROR: i32 = 5;
pub const REASSEMBLY_ERROR: i32 = 6;
pub const RETENTION_ERROR: i32 = 7;
pub const HARDWARE_ERROR: i32 = 8;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::InvalidEndpoint { .. } | TransportError::Unsupported(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(FRAMING_ERROR, format!("{context}: {other}")),
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

/// Map a fatal pipeline error to the exit status of the stage that failed.
pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    let code = match &err {
        PipelineError::Transport(_) => TRANSPORT_ERROR,
        PipelineError::Frame(FrameError::Timeout(_)) => TIMEOUT,
        PipelineError::Frame(FrameError::ConnectionClosed) => FAILURE,
        PipelineError::Frame(_) => FRAMING_ERROR,
        PipelineError::Pool(_) => POOL_ERROR,
        PipelineError::Reassembly(_) => REASSEMBLY_ERROR,
        PipelineError::Retention(_) => RETENTION_ERROR,
        PipelineError::Hardware(_) => HARDWARE_ERROR,
        PipelineError::Control(_) | PipelineError::Config(_) => DATA_INVALID,
    };
    CliError::new(code, format!("{context} ({} stage): {err}", err.stage()))
}
