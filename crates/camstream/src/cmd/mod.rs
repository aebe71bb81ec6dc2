use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camstream_frame::FramingPolicy;
use camstream_pipeline::config::{DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};
use camstream_transport::{
    connect, listen, ConnectConfig, ConnectionHandle, Endpoint, ListenConfig,
    DEFAULT_MAX_CONNECT_ATTEMPTS,
};
use clap::{Args, Subcommand};

use crate::exit::{transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod receive;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode an Annex-B file and stream it to one peer.
    Stream(StreamArgs),
    /// Receive a stream and write the elementary stream out.
    Receive(ReceiveArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Stream(args) => stream::run(args, format),
        Command::Receive(args) => receive::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// How the single connection is established.
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Peer address: host:port, tcp://host:port or udp://host:port.
    pub endpoint: String,
    /// Listen on the endpoint and accept one peer instead of connecting.
    #[arg(long, short = 'l')]
    pub listen: bool,
    /// Socket send/receive timeout (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
    /// Give up connecting after this many refused attempts.
    #[arg(long, value_name = "N")]
    pub connect_attempts: Option<u64>,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Annex-B H.264 input; `-` reads stdin.
    #[arg(long, short = 'i', default_value = "-")]
    pub input: PathBuf,
    /// JSON stream configuration. Flags below override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Wire framing: raw, length-prefixed or typed.
    #[arg(long)]
    pub framing: Option<FramingPolicy>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Number of pool buffers.
    #[arg(long)]
    pub buffers: Option<usize>,
    /// Bytes per pool buffer.
    #[arg(long)]
    pub buffer_size: Option<usize>,
    /// Drop low-motion inter-frames.
    #[arg(long)]
    pub retention: bool,
    /// Motion score above which frames are retained.
    #[arg(long)]
    pub threshold: Option<u8>,
    /// Bytes reserved for the held frame.
    #[arg(long)]
    pub scratch: Option<usize>,
    /// Request motion vectors from the encoder.
    #[arg(long)]
    pub motion: bool,
    /// Send a motion alarm when the score exceeds N (typed framing).
    #[arg(long, value_name = "N")]
    pub alarm: Option<u8>,
    /// Annotate frames with running statistics.
    #[arg(long)]
    pub stats: bool,
    /// Config headers sent before further ones are suppressed (typed framing).
    #[arg(long)]
    pub header_limit: Option<u32>,
    /// Pace delivery to this many frames per second.
    #[arg(long)]
    pub fps: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Where to write the elementary stream; `-` writes stdout.
    #[arg(long, short = 'o', default_value = "-")]
    pub output: PathBuf,
    /// Wire framing used by the sender.
    #[arg(long, default_value = "length-prefixed")]
    pub framing: FramingPolicy,
    /// Number of decoder buffers.
    #[arg(long, default_value_t = DEFAULT_BUFFER_COUNT)]
    pub buffers: usize,
    /// Bytes per decoder buffer.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Control command sent to the sender after connecting (repeatable).
    #[arg(long = "command", short = 'c', value_name = "KEY=VALUE")]
    pub commands: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Open the one connection the command runs on.
pub fn open_connection(args: &ConnectionArgs) -> CliResult<(Endpoint, ConnectionHandle)> {
    let endpoint: Endpoint = args
        .endpoint
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))?;
    let timeout = parse_duration(&args.timeout)?;

    let handle = if args.listen {
        let config = ListenConfig {
            recv_timeout: Some(timeout),
            send_timeout: Some(timeout),
        };
        listen(&endpoint, config).map_err(|err| transport_error("listen failed", err))?
    } else {
        let config = ConnectConfig {
            max_attempts: args
                .connect_attempts
                .unwrap_or(DEFAULT_MAX_CONNECT_ATTEMPTS),
            recv_timeout: Some(timeout),
            send_timeout: Some(timeout),
            ..ConnectConfig::default()
        };
        connect(&endpoint, &config).map_err(|err| transport_error("connect failed", err))?
    };
    Ok((endpoint, handle))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Set `stop` on Ctrl-C.
pub fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
