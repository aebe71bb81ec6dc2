use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use camstream_frame::{FrameConfig, FrameReader};
use camstream_pipeline::{AcquireMode, BufferPool, BufferRecycler, ControlCommand, DecodePipeline};
use camstream_transport::ConnectionHandle;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, open_connection, parse_duration, ReceiveArgs};
use crate::exit::{
    frame_error, io_error, pipeline_error, transport_error, CliError, CliResult, SUCCESS, USAGE,
};
use crate::output::{print_receive_stats, OutputFormat};
use crate::sink::DecoderSink;

type Output = Box<dyn Write + Send>;

pub fn run(args: ReceiveArgs, format: OutputFormat) -> CliResult<i32> {
    validate_commands(&args.commands)?;
    if args.buffers == 0 || args.buffer_size == 0 {
        return Err(CliError::new(USAGE, "--buffers and --buffer-size must be non-zero"));
    }
    let timeout = parse_duration(&args.connection.timeout)?;
    let to_stdout = args.output.as_os_str() == "-";
    let output = open_output(&args.output)?;

    let (endpoint, handle) = open_connection(&args.connection)?;
    send_commands(&handle, &args.commands)?;
    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&stop))?;

    let pool = Arc::new(BufferPool::new(args.buffers, args.buffer_size));
    let sink = Arc::new(Mutex::new(DecoderSink::new(
        BufWriter::new(output),
        Arc::clone(&pool),
    )));
    let recycler = BufferRecycler::new(
        Arc::clone(&pool),
        Arc::clone(&sink),
        AcquireMode::Blocking {
            timeout: Some(timeout),
        },
    );

    let frame_config = FrameConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        ..FrameConfig::with_policy(args.framing)
    };
    let reader = FrameReader::with_config_conn(handle, frame_config)
        .map_err(|err| frame_error("receive setup failed", err))?;

    info!(%endpoint, framing = %args.framing, "receiving");
    let mut pipeline = DecodePipeline::new(reader, recycler);
    let outcome = pipeline.run(&stop);
    let finished = pipeline.finish();
    outcome.map_err(|err| pipeline_error("receive failed", err))?;
    let stats = finished.map_err(|err| pipeline_error("receive failed", err))?;

    let bytes_written = sink
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .bytes_written();
    info!(frames = stats.frames, bytes_written, "receive finished");
    if !to_stdout {
        print_receive_stats(&stats, &endpoint.to_string(), bytes_written, format);
    }
    Ok(SUCCESS)
}

fn validate_commands(commands: &[String]) -> CliResult<()> {
    for command in commands {
        command
            .parse::<ControlCommand>()
            .map_err(|err| CliError::new(USAGE, format!("invalid --command {command:?}: {err}")))?;
    }
    Ok(())
}

/// Write each command as one line on the connection's control direction.
fn send_commands(handle: &ConnectionHandle, commands: &[String]) -> CliResult<()> {
    if commands.is_empty() {
        return Ok(());
    }
    let mut control = handle
        .try_clone()
        .map_err(|err| transport_error("control channel setup failed", err))?;
    for command in commands {
        control
            .write_all(format!("{}\n", command.trim()).as_bytes())
            .map_err(|err| io_error("sending control command failed", err))?;
        info!(command = command.trim(), "control command sent");
    }
    control
        .flush()
        .map_err(|err| io_error("sending control command failed", err))
}

fn open_output(path: &Path) -> CliResult<Output> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdout()));
    }
    let file = File::create(path)
        .map_err(|err| io_error(&format!("failed creating {}", path.display()), err))?;
    Ok(Box::new(file))
}
