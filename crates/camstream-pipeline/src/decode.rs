use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use camstream_frame::{FrameError, FrameReader, FramingPolicy, Message};
use tracing::{debug, info};

use crate::buffer::BufferFlags;
use crate::error::Result;
use crate::hardware::HardwarePort;
use crate::recycler::BufferRecycler;
use crate::stats::DecodeStats;

/// Socket-to-decoder direction.
///
/// Payloads are copied into pool buffers and handed to the decoder port,
/// which gives each buffer back to the pool once it has consumed it. The
/// recycler's acquire mode decides whether a slow decoder stalls the reader.
pub struct DecodePipeline<R, P> {
    reader: FrameReader<R>,
    recycler: BufferRecycler<P>,
    stats: DecodeStats,
}

impl<R: Read, P: HardwarePort> DecodePipeline<R, P> {
    pub fn new(reader: FrameReader<R>, recycler: BufferRecycler<P>) -> Self {
        Self {
            reader,
            recycler,
            stats: DecodeStats::default(),
        }
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Read until the peer closes the stream or `stop` is set.
    ///
    /// A receive timeout while `stop` is set ends the loop cleanly; otherwise
    /// it is fatal like any other read error.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        info!(policy = %self.reader.config().policy, "decode pipeline started");
        while !stop.load(Ordering::Relaxed) {
            let message = match self.reader.read_message() {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("stream closed by peer");
                    break;
                }
                Err(FrameError::Timeout(_)) if stop.load(Ordering::Relaxed) => break,
                Err(err) => return Err(err.into()),
            };
            self.on_message(message)?;
        }
        Ok(())
    }

    /// Handle one decoded message.
    pub fn on_message(&mut self, message: Message) -> Result<()> {
        self.stats.messages += 1;
        match message {
            Message::ConfigHeader(payload) => {
                self.stats.config_headers += 1;
                self.deliver(&payload, BufferFlags::CONFIG | BufferFlags::FRAME_END)
            }
            Message::RegularFrame(payload) => {
                if self.reader.config().policy == FramingPolicy::Raw {
                    self.deliver(&payload, BufferFlags::EMPTY)
                } else {
                    self.stats.frames += 1;
                    self.deliver(&payload, BufferFlags::FRAME_END)
                }
            }
            Message::MotionInFrame(score) => {
                self.stats.motion_messages += 1;
                self.stats.last_motion = score;
                debug!(score, "motion in frame");
                Ok(())
            }
            Message::MotionAlarm => {
                self.stats.alarms += 1;
                info!(score = self.stats.last_motion, "motion alarm");
                Ok(())
            }
            Message::CurrentResolution { width, height } => {
                self.stats.width = Some(width);
                self.stats.height = Some(height);
                info!(width, height, "stream resolution");
                Ok(())
            }
        }
    }

    /// Reclaim buffers from the decoder and report.
    pub fn finish(self) -> Result<DecodeStats> {
        self.recycler.shutdown()?;
        info!(
            frames = self.stats.frames,
            bytes = self.stats.bytes_received,
            "decode pipeline finished"
        );
        Ok(self.stats)
    }

    /// Copy `payload` into as many buffers as it needs. Only the last one
    /// carries `FRAME_END`.
    fn deliver(&mut self, payload: &[u8], flags: BufferFlags) -> Result<()> {
        self.stats.bytes_received += payload.len() as u64;
        let pool = self.recycler.pool();
        let chunk_size = pool.buffer_size();
        let mut chunks = payload.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            let mut chunk_flags = flags;
            if chunks.peek().is_some() {
                chunk_flags.remove(BufferFlags::FRAME_END);
            }
            let mut buffer = pool.acquire_empty(self.recycler.acquire_mode())?;
            buffer.fill(chunk, chunk_flags)?;
            self.recycler.lock_port().send_buffer(buffer)?;
            self.stats.buffers_sent += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use camstream_frame::{FrameConfig, FrameWriter};

    use super::*;
    use crate::buffer::Buffer;
    use crate::error::{HardwareError, PipelineError};
    use crate::hardware::Parameter;
    use crate::pool::{AcquireMode, BufferPool};

    /// Decoder that consumes buffers immediately.
    struct DrainingPort {
        pool: Arc<BufferPool>,
        output: Vec<u8>,
        flags: Vec<BufferFlags>,
    }

    impl HardwarePort for DrainingPort {
        fn is_enabled(&self) -> bool {
            true
        }

        fn send_buffer(&mut self, buffer: Buffer) -> std::result::Result<(), HardwareError> {
            self.output.extend_from_slice(buffer.data());
            self.flags.push(buffer.flags());
            self.pool
                .release(buffer)
                .map_err(|err| HardwareError::Component(err.to_string()))
        }

        fn enable(&mut self) -> std::result::Result<(), HardwareError> {
            Ok(())
        }

        fn disable(&mut self) -> std::result::Result<Vec<Buffer>, HardwareError> {
            Ok(Vec::new())
        }

        fn set_parameter(&mut self, _: Parameter) -> std::result::Result<(), HardwareError> {
            Ok(())
        }
    }

    fn pipeline(
        wire: Vec<u8>,
        policy: FramingPolicy,
        buffer_size: usize,
    ) -> DecodePipeline<Cursor<Vec<u8>>, DrainingPort> {
        let pool = Arc::new(BufferPool::new(2, buffer_size));
        let port = DrainingPort {
            pool: Arc::clone(&pool),
            output: Vec::new(),
            flags: Vec::new(),
        };
        let recycler = BufferRecycler::new(
            pool,
            Arc::new(Mutex::new(port)),
            AcquireMode::Blocking {
                timeout: Some(Duration::from_millis(100)),
            },
        );
        let reader = FrameReader::with_config(Cursor::new(wire), FrameConfig::with_policy(policy));
        DecodePipeline::new(reader, recycler)
    }

    #[test]
    fn typed_stream_reaches_decoder() {
        let mut writer = FrameWriter::with_config(Vec::new(), FrameConfig::with_policy(FramingPolicy::Typed));
        writer.write_resolution(640, 480).unwrap();
        writer.write_config(b"SPS").unwrap();
        writer.write_frame(&[b"0123456789"]).unwrap();
        writer.write_motion(42, 10).unwrap();

        let mut decode = pipeline(writer.into_inner(), FramingPolicy::Typed, 4);
        decode.run(&AtomicBool::new(false)).unwrap();

        {
            let port = decode.recycler.lock_port();
            assert_eq!(port.output, b"SPS0123456789");
            assert_eq!(
                port.flags,
                vec![
                    BufferFlags::CONFIG | BufferFlags::FRAME_END,
                    BufferFlags::EMPTY,
                    BufferFlags::EMPTY,
                    BufferFlags::FRAME_END,
                ]
            );
        }

        let pool = Arc::clone(decode.recycler.pool());
        let stats = decode.finish().unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.config_headers, 1);
        assert_eq!(stats.alarms, 1);
        assert_eq!(stats.last_motion, 42);
        assert_eq!((stats.width, stats.height), (Some(640), Some(480)));
        assert_eq!(stats.buffers_sent, 4);
        assert_eq!(pool.acquired_count(), pool.released_count());
    }

    #[test]
    fn raw_stream_passes_through() {
        let mut decode = pipeline(b"raw elementary stream".to_vec(), FramingPolicy::Raw, 64);
        decode.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(decode.recycler.lock_port().output, b"raw elementary stream");
        assert_eq!(decode.stats().frames, 0);
        assert_eq!(decode.stats().bytes_received, 21);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut wire = 100u32.to_ne_bytes().to_vec();
        wire.extend_from_slice(b"partial");
        let mut decode = pipeline(wire, FramingPolicy::LengthPrefixed, 64);
        let err = decode.run(&AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, PipelineError::Frame(FrameError::ConnectionClosed)));
    }

    #[test]
    fn stop_flag_ends_before_reading() {
        let mut decode = pipeline(b"ignored".to_vec(), FramingPolicy::Raw, 64);
        decode.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(decode.stats().messages, 0);
    }
}
