use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camstream_frame::FrameWriter;
use camstream_pipeline::{
    BufferFlags, BufferPool, BufferRecycler, CommandInterpreter, ControlState, EncodePipeline,
    HardwarePort, Parameter, StreamConfig,
};
use camstream_transport::Protocol;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, open_connection, parse_duration, StreamArgs};
use crate::exit::{
    config_error, frame_error, io_error, pipeline_error, transport_error, CliResult, SUCCESS,
};
use crate::output::{print_stream_stats, OutputFormat};
use crate::source::{Delivery, SimulatedEncoder};

type Input = Box<dyn Read + Send>;

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let config = build_config(&args)?;
    let timeout = parse_duration(&args.connection.timeout)?;
    let input = open_input(&args.input)?;
    let frame_interval = args
        .fps
        .filter(|fps| *fps > 0)
        .map(|fps| Duration::from_secs(1) / fps);

    let (endpoint, handle) = open_connection(&args.connection)?;
    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&stop))?;

    let side_channel = config.side_channel_enabled();
    let mut encoder = SimulatedEncoder::new(input, config.grid());
    encoder
        .set_parameter(Parameter::InlineMotionVectors(side_channel))
        .and_then(|()| encoder.enable())
        .and_then(|()| encoder.set_parameter(Parameter::Capture(true)))
        .map_err(|err| pipeline_error("encoder setup failed", err.into()))?;

    let pool = Arc::new(BufferPool::new(
        config.pool.buffer_count,
        config.pool.buffer_size,
    ));
    let recycler = BufferRecycler::new(
        Arc::clone(&pool),
        Arc::new(Mutex::new(encoder)),
        config.pool.acquire_mode(),
    );
    let control = Arc::new(
        ControlState::new(config.show_stats, side_channel, config.alarm_threshold)
            .with_retention(config.retention.enabled),
    );

    let control_half = handle
        .try_clone()
        .map_err(|err| transport_error("control channel setup failed", err))?;
    let control_thread = CommandInterpreter::new(Arc::clone(&control), recycler.clone())
        .spawn(BufReader::new(control_half))
        .map_err(|err| io_error("control thread failed to start", err))?;

    let mut frame_config = config.frame_config();
    frame_config.write_timeout = Some(timeout);
    let write_half = handle
        .try_clone()
        .map_err(|err| transport_error("stream setup failed", err))?;
    let writer = FrameWriter::with_config_conn(write_half, frame_config)
        .map_err(|err| frame_error("stream setup failed", err))?;

    info!(%endpoint, framing = %config.framing, side_channel, "streaming");
    let mut pipeline = EncodePipeline::new(&config, writer, recycler, control);
    let result = stream_all(&mut pipeline, &stop, frame_interval).and_then(|()| pipeline.finish());

    if let Err(err) = handle.shutdown() {
        warn!(error = %err, "connection shutdown failed");
    }
    let stats = result.map_err(|err| pipeline_error("stream failed", err))?;

    // A UDP read half never sees end of stream; leave that thread behind.
    if handle.protocol() == Protocol::Tcp {
        match control_thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(pipeline_error("control channel failed", err)),
            Err(_) => warn!("control thread panicked"),
        }
    }

    info!(
        frames = stats.frames,
        acquired = pool.acquired_count(),
        released = pool.released_count(),
        "stream finished"
    );
    print_stream_stats(&stats, &endpoint.to_string(), format);
    Ok(SUCCESS)
}

/// Deliver encoder output into the pipeline until the input ends or `stop`
/// is set.
fn stream_all<W: Write>(
    pipeline: &mut EncodePipeline<W, SimulatedEncoder<Input>>,
    stop: &AtomicBool,
    frame_interval: Option<Duration>,
) -> camstream_pipeline::Result<()> {
    pipeline.start()?;
    let mut next_frame = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let delivery = pipeline.recycler().lock_port().poll()?;
        match delivery {
            Delivery::Filled(buffer) => {
                let flags = buffer.flags();
                let frame_end = flags.contains(BufferFlags::FRAME_END)
                    && !flags.intersects(BufferFlags::CONFIG | BufferFlags::SIDE_INFO);
                pipeline.on_buffer(buffer)?;

                if let (true, Some(interval)) = (frame_end, frame_interval) {
                    next_frame += interval;
                    if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
            }
            Delivery::Paused => thread::sleep(Duration::from_millis(1)),
            Delivery::Finished => {
                info!("input exhausted");
                break;
            }
        }
    }
    Ok(())
}

fn build_config(args: &StreamArgs) -> CliResult<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => {
            StreamConfig::load(path).map_err(|err| config_error("invalid config file", err))?
        }
        None => StreamConfig::default(),
    };

    if let Some(framing) = args.framing {
        config.framing = framing;
    }
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    if let Some(buffers) = args.buffers {
        config.pool.buffer_count = buffers;
    }
    if let Some(size) = args.buffer_size {
        config.pool.buffer_size = size;
    }
    if args.retention {
        config.retention.enabled = true;
    }
    if let Some(threshold) = args.threshold {
        config.retention.threshold = threshold;
    }
    if let Some(scratch) = args.scratch {
        config.retention.scratch_capacity = scratch;
    }
    if args.motion {
        config.motion_vectors = true;
    }
    if let Some(alarm) = args.alarm {
        config.alarm_threshold = alarm;
    }
    if args.stats {
        config.show_stats = true;
    }
    if let Some(limit) = args.header_limit {
        config.config_header_limit = limit;
    }

    config
        .validate()
        .map_err(|err| config_error("invalid configuration", err))?;
    Ok(config)
}

fn open_input(path: &Path) -> CliResult<Input> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    let file = File::open(path)
        .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
    Ok(Box::new(file))
}
