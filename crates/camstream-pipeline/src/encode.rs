use std::io::Write;
use std::sync::Arc;

use camstream_frame::FrameWriter;
use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::config::StreamConfig;
use crate::control::ControlState;
use crate::error::Result;
use crate::hardware::{HardwarePort, Parameter};
use crate::processor::{Action, Outbound, StreamProcessor};
use crate::recycler::BufferRecycler;
use crate::stats::{StatsTracker, StreamStats};

/// Encoder-to-socket direction.
///
/// Every buffer the encoder delivers goes through [`on_buffer`](Self::on_buffer),
/// which processes it, writes whatever is ready and hands spent buffers back
/// to the encoder.
pub struct EncodePipeline<W, P> {
    processor: StreamProcessor,
    writer: FrameWriter<W>,
    recycler: BufferRecycler<P>,
    control: Arc<ControlState>,
    stats: StatsTracker,
    resolution: (u32, u32),
}

impl<W: Write, P: HardwarePort> EncodePipeline<W, P> {
    pub fn new(
        config: &StreamConfig,
        writer: FrameWriter<W>,
        recycler: BufferRecycler<P>,
        control: Arc<ControlState>,
    ) -> Self {
        let mut processor = StreamProcessor::new(config.grid());
        if config.retention.enabled {
            processor = processor
                .with_retention(config.retention.threshold, config.retention.scratch_capacity);
        }
        Self {
            processor,
            writer,
            recycler,
            control,
            stats: StatsTracker::new(),
            resolution: (config.width, config.height),
        }
    }

    pub fn recycler(&self) -> &BufferRecycler<P> {
        &self.recycler
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    /// Announce the resolution and hand the pool to the encoder.
    pub fn start(&mut self) -> Result<()> {
        let (width, height) = self.resolution;
        self.writer.write_resolution(width, height)?;
        let primed = self.recycler.prime()?;
        info!(width, height, primed, "encode pipeline started");
        Ok(())
    }

    /// Handle one filled buffer from the encoder.
    pub fn on_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.processor.set_side_channel(self.control.motion_vectors());
        let outcome = match self.processor.on_buffer(buffer) {
            Action::Forward(out) => self.emit(out),
            Action::Hold | Action::Drop => Ok(()),
            Action::Fatal(err) => Err(err),
        };
        self.release_spent()?;
        outcome
    }

    /// Settle anything held, return every buffer to the pool and report.
    pub fn finish(mut self) -> Result<StreamStats> {
        let out = self.processor.finish()?;
        self.emit(out)?;
        self.release_spent()?;
        self.writer.flush()?;
        self.recycler.shutdown()?;

        let stats = self.stats.snapshot(self.processor.retention_stats());
        info!(
            frames = stats.frames,
            bytes = stats.bytes_sent,
            skipped = stats.retention.skipped,
            "encode pipeline finished"
        );
        Ok(stats)
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.snapshot(self.processor.retention_stats())
    }

    fn emit(&mut self, out: Vec<Outbound>) -> Result<()> {
        for item in out {
            match item {
                Outbound::Config(buffer) => {
                    let sent = self.writer.write_config(buffer.data())?;
                    self.stats.record_config(sent);
                    self.recycler.release_and_refill(buffer)?;
                }
                Outbound::Frame(frame) => {
                    let len = frame.len();
                    self.writer.write_frame(&frame.chunks())?;
                    for buffer in frame.into_buffers() {
                        self.recycler.release_and_refill(buffer)?;
                    }
                    self.frame_written(len)?;
                }
                Outbound::Retained(bytes) => {
                    self.writer.write_frame(&[bytes.as_ref()])?;
                    self.frame_written(bytes.len())?;
                }
                Outbound::Motion(score) => {
                    let alarm = self
                        .writer
                        .write_motion(score.0, self.control.alarm_threshold())?;
                    if alarm {
                        info!(score = score.0, "motion alarm");
                    }
                    self.stats.record_motion(score, alarm);
                }
            }
        }
        Ok(())
    }

    fn frame_written(&mut self, len: usize) -> Result<()> {
        self.stats.record_frame(len);
        debug!(len, "frame sent");
        if self.control.show_stats() {
            let text = self
                .stats
                .annotation(self.processor.retention_stats().skipped);
            self.recycler
                .lock_port()
                .set_parameter(Parameter::Annotate(Some(text)))?;
        }
        Ok(())
    }

    fn release_spent(&mut self) -> Result<()> {
        for buffer in self.processor.drain_spent() {
            self.recycler.release_and_refill(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::BytesMut;
    use camstream_frame::{decode_message, FrameConfig, FramingPolicy, Message};

    use super::*;
    use crate::buffer::BufferFlags;
    use crate::control::{CommandInterpreter, ControlCommand};
    use crate::hardware::mock::MockPort;
    use crate::pool::{AcquireMode, BufferPool};

    struct Harness {
        pipeline: EncodePipeline<Vec<u8>, MockPort>,
        recycler: BufferRecycler<MockPort>,
    }

    impl Harness {
        fn new(config: StreamConfig, control: ControlState) -> Self {
            let recycler = BufferRecycler::new(
                Arc::new(BufferPool::new(config.pool.buffer_count, config.pool.buffer_size)),
                Arc::new(Mutex::new(MockPort::enabled())),
                AcquireMode::NonBlocking,
            );
            let writer = FrameWriter::with_config(Vec::new(), config.frame_config());
            let mut pipeline =
                EncodePipeline::new(&config, writer, recycler.clone(), Arc::new(control));
            pipeline.start().unwrap();
            Self { pipeline, recycler }
        }

        /// Simulate the encoder filling its next buffer.
        fn deliver(&mut self, bytes: &[u8], flags: BufferFlags) {
            let mut buffer = self.recycler.lock_port().held.pop_front().unwrap();
            buffer.fill(bytes, flags).unwrap();
            self.pipeline.on_buffer(buffer).unwrap();
        }
    }

    fn typed_config() -> StreamConfig {
        StreamConfig {
            width: 32,
            height: 16,
            framing: FramingPolicy::Typed,
            pool: crate::config::PoolConfig {
                buffer_count: 2,
                buffer_size: 256,
                ..Default::default()
            },
            ..StreamConfig::default()
        }
    }

    fn decode_all(wire: Vec<u8>) -> Vec<Message> {
        let mut buf = BytesMut::from(wire.as_slice());
        std::iter::from_fn(|| decode_message(&mut buf, usize::MAX).unwrap()).collect()
    }

    #[test]
    fn typed_stream_with_split_frame_and_alarm() {
        let mut harness = Harness::new(typed_config(), ControlState::new(false, true, 4));
        harness.deliver(b"sps", BufferFlags::CONFIG);
        harness.deliver(b"pps", BufferFlags::CONFIG);
        harness.deliver(b"sps", BufferFlags::CONFIG);
        harness.deliver(&[1; 100], BufferFlags::KEYFRAME);
        harness.deliver(&[2; 50], BufferFlags::FRAME_END | BufferFlags::KEYFRAME);

        let mut side = vec![0u8; 12];
        side[0] = 3;
        side[1] = 4;
        harness.deliver(&side, BufferFlags::SIDE_INFO);

        let stats = harness.pipeline.stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.bytes_sent, 150);
        assert_eq!(stats.config_headers_sent, 2);
        assert_eq!(stats.config_headers_suppressed, 1);
        assert_eq!(stats.last_motion, 5);
        assert_eq!(stats.alarms, 1);
        assert_eq!(harness.recycler.lock_port().held.len(), 2);

        harness.pipeline.finish().unwrap();
        let pool = harness.recycler.pool();
        assert_eq!(pool.acquired_count(), pool.released_count());
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn wire_contents_in_order() {
        let config = typed_config();
        let recycler = BufferRecycler::new(
            Arc::new(BufferPool::new(2, 256)),
            Arc::new(Mutex::new(MockPort::enabled())),
            AcquireMode::NonBlocking,
        );
        let mut pipeline = EncodePipeline::new(
            &config,
            FrameWriter::with_config(Vec::new(), FrameConfig::with_policy(FramingPolicy::Typed)),
            recycler.clone(),
            Arc::new(ControlState::new(false, true, 0)),
        );
        pipeline.start().unwrap();

        let mut deliver = |bytes: &[u8], flags: BufferFlags| {
            let mut buffer = recycler.lock_port().held.pop_front().unwrap();
            buffer.fill(bytes, flags).unwrap();
            pipeline.on_buffer(buffer).unwrap();
        };
        deliver(b"sps", BufferFlags::CONFIG);
        deliver(b"frame", BufferFlags::FRAME_END | BufferFlags::KEYFRAME);
        deliver(&[0u8; 12], BufferFlags::SIDE_INFO);

        let wire = pipeline.writer.get_ref().clone();
        assert_eq!(
            decode_all(wire),
            vec![
                Message::CurrentResolution {
                    width: 32,
                    height: 16
                },
                Message::ConfigHeader(bytes::Bytes::from_static(b"sps")),
                Message::RegularFrame(bytes::Bytes::from_static(b"frame")),
                Message::MotionInFrame(0),
            ]
        );
    }

    #[test]
    fn stats_toggle_annotates_each_frame() {
        let mut config = typed_config();
        config.framing = FramingPolicy::Raw;
        let mut harness = Harness::new(config, ControlState::new(true, false, 0));
        harness.deliver(b"a", BufferFlags::FRAME_END);
        harness.deliver(b"b", BufferFlags::FRAME_END);

        let annotations: Vec<Parameter> = harness
            .recycler
            .lock_port()
            .parameters
            .iter()
            .filter(|p| matches!(p, Parameter::Annotate(_)))
            .cloned()
            .collect();
        assert_eq!(annotations.len(), 2);
        assert_eq!(
            annotations[1],
            Parameter::Annotate(Some("FPS=0.0, 2, 0, 0".to_string()))
        );
        assert_eq!(harness.pipeline.writer.get_ref().as_slice(), b"ab");
    }

    #[test]
    fn retention_drops_quiet_frames_from_the_wire() {
        let mut config = typed_config();
        config.framing = FramingPolicy::LengthPrefixed;
        config.retention.enabled = true;
        config.retention.scratch_capacity = 1024;
        let mut harness = Harness::new(config, ControlState::new(false, true, 0));

        harness.deliver(b"key", BufferFlags::FRAME_END | BufferFlags::KEYFRAME);
        harness.deliver(&[0; 12], BufferFlags::SIDE_INFO);
        harness.deliver(b"held", BufferFlags::FRAME_END);
        harness.deliver(&[0; 12], BufferFlags::SIDE_INFO);
        harness.deliver(b"quiet", BufferFlags::FRAME_END);
        harness.deliver(&[0; 12], BufferFlags::SIDE_INFO);

        let stats = harness.pipeline.finish().unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.retention.skipped, 1);
        let pool = harness.recycler.pool();
        assert_eq!(pool.acquired_count(), pool.released_count());
    }

    #[test]
    fn alarm_armed_mid_stream_scores_the_next_frames() {
        let mut config = typed_config();
        config.retention.enabled = true;
        config.retention.threshold = 5;
        config.retention.scratch_capacity = 1024;
        let mut harness = Harness::new(config, ControlState::new(false, false, 0));

        harness.deliver(b"key", BufferFlags::FRAME_END | BufferFlags::KEYFRAME);

        let interpreter = CommandInterpreter::new(
            Arc::clone(harness.pipeline.control()),
            harness.recycler.clone(),
        );
        interpreter.apply(ControlCommand::MotionAlarm(3)).unwrap();
        assert!(harness.pipeline.control().motion_vectors());
        assert_eq!(harness.recycler.lock_port().held.len(), 2);

        harness.deliver(b"after-key", BufferFlags::FRAME_END);
        harness.deliver(&[0; 12], BufferFlags::SIDE_INFO);
        harness.deliver(b"moving", BufferFlags::FRAME_END);
        let mut side = vec![0u8; 12];
        side[0] = 6;
        side[1] = 8;
        harness.deliver(&side, BufferFlags::SIDE_INFO);

        let stats = harness.pipeline.finish().unwrap();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.retention.flushed, 1);
        assert_eq!(stats.last_motion, 10);
        assert_eq!(stats.alarms, 1);
        let pool = harness.recycler.pool();
        assert_eq!(pool.acquired_count(), pool.released_count());
        assert_eq!(pool.available(), pool.size());
    }
}
