use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use camstream_transport::ConnectionHandle;
use tracing::debug;

use crate::codec::{encode_header, FrameConfig, FramingPolicy, MessageType};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 64;

/// Writes stream messages to any `Write` sink using one framing policy.
///
/// Frame payloads are passed as a list of chunks so a frame that arrived
/// split across two buffers is sent without being copied together first.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    config_headers_sent: u32,
}

impl<T: Write> FrameWriter<T> {
    /// Create a writer with default configuration (length-prefixed).
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            config_headers_sent: 0,
        }
    }

    /// Send a codec configuration header (SPS/PPS).
    ///
    /// With typed framing only the first `config_header_limit` headers are
    /// sent; later ones are suppressed and `Ok(false)` is returned.
    pub fn write_config(&mut self, payload: &[u8]) -> Result<bool> {
        if self.config.policy == FramingPolicy::Typed
            && self.config_headers_sent >= self.config.config_header_limit
        {
            debug!(
                len = payload.len(),
                limit = self.config.config_header_limit,
                "config header suppressed"
            );
            return Ok(false);
        }

        self.write_unit(MessageType::ConfigHeader, &[payload])?;
        self.config_headers_sent = self.config_headers_sent.saturating_add(1);
        Ok(true)
    }

    /// Send one logical frame made of one or more contiguous chunks.
    pub fn write_frame(&mut self, chunks: &[&[u8]]) -> Result<()> {
        self.write_unit(MessageType::RegularFrame, chunks)
    }

    /// Send the motion score of the frame just written.
    ///
    /// Typed framing only; other policies carry no side messages. A
    /// `MotionAlarm` follows when `alarm_threshold` is nonzero and the score
    /// exceeds it. Returns whether the alarm was sent.
    pub fn write_motion(&mut self, score: u8, alarm_threshold: u8) -> Result<bool> {
        if self.config.policy != FramingPolicy::Typed {
            return Ok(false);
        }

        let alarm = alarm_threshold != 0 && score > alarm_threshold;
        self.buf.clear();
        self.buf.put_u8(MessageType::MotionInFrame as u8);
        self.buf.put_u8(score);
        if alarm {
            self.buf.put_u8(MessageType::MotionAlarm as u8);
        }
        write_fully(&mut self.inner, &self.buf)?;
        Ok(alarm)
    }

    /// Announce the capture resolution. Typed framing only.
    pub fn write_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        if self.config.policy != FramingPolicy::Typed {
            return Ok(());
        }
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&width.to_ne_bytes());
        body[4..].copy_from_slice(&height.to_ne_bytes());
        self.write_unit(MessageType::CurrentResolution, &[&body])
    }

    fn write_unit(&mut self, message_type: MessageType, chunks: &[&[u8]]) -> Result<()> {
        let len: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        if len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_header(self.config.policy, message_type, len, &mut self.buf)?;
        if !self.buf.is_empty() {
            write_fully(&mut self.inner, &self.buf)?;
        }
        for chunk in chunks {
            write_fully(&mut self.inner, chunk)?;
        }
        Ok(())
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(classify(err)),
            }
        }
    }

    /// Number of config headers actually sent so far.
    pub fn config_headers_sent(&self) -> u32 {
        self.config_headers_sent
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner sink.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<ConnectionHandle> {
    /// Create a writer for a connection and apply the write timeout from config.
    pub fn with_config_conn(inner: ConnectionHandle, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Write every byte of `data`. A write that makes no progress, a timeout or
/// any other error is fatal.
fn write_fully<T: Write>(inner: &mut T, data: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        match inner.write(&data[offset..]) {
            Ok(0) => {
                return Err(FrameError::ShortWrite {
                    written: offset,
                    expected: data.len(),
                })
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(classify(err)),
        }
    }
    Ok(())
}

pub(crate) fn classify(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => FrameError::Timeout(err),
        _ => FrameError::Io(err),
    }
}

pub(crate) fn transport_to_frame_error(err: camstream_transport::TransportError) -> FrameError {
    match err {
        camstream_transport::TransportError::Io(io)
        | camstream_transport::TransportError::AcceptFailed(io) => FrameError::Io(io),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_message, Message, DEFAULT_MAX_PAYLOAD};

    fn typed_writer() -> FrameWriter<Cursor<Vec<u8>>> {
        FrameWriter::with_config(
            Cursor::new(Vec::new()),
            FrameConfig::with_policy(FramingPolicy::Typed),
        )
    }

    fn wire(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn raw_frame_has_no_delimiter() {
        let mut writer = FrameWriter::with_config(
            Cursor::new(Vec::new()),
            FrameConfig::with_policy(FramingPolicy::Raw),
        );
        writer.write_config(b"sps").unwrap();
        writer.write_frame(&[b"head", b"tail"]).unwrap();
        assert!(!writer.write_motion(200, 1).unwrap());
        assert_eq!(wire(writer), b"spsheadtail");
    }

    #[test]
    fn length_prefixed_split_frame_is_one_unit() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.write_frame(&[&[1u8; 100], &[2u8; 50]]).unwrap();

        let bytes = wire(writer);
        assert_eq!(&bytes[..4], &150u32.to_ne_bytes());
        assert_eq!(bytes.len(), 154);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[153], 2);
    }

    #[test]
    fn length_prefixed_config_headers_are_not_capped() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        for _ in 0..4 {
            assert!(writer.write_config(b"pps").unwrap());
        }
        assert_eq!(writer.config_headers_sent(), 4);
        assert_eq!(wire(writer).len(), 4 * 7);
    }

    #[test]
    fn typed_config_headers_capped_at_limit() {
        let mut writer = typed_writer();
        assert!(writer.write_config(b"sps").unwrap());
        assert!(writer.write_config(b"pps").unwrap());
        assert!(!writer.write_config(b"sps").unwrap());
        assert_eq!(writer.config_headers_sent(), 2);

        let mut bytes = BytesMut::from(wire(writer).as_slice());
        let mut count = 0;
        while let Some(message) = decode_message(&mut bytes, DEFAULT_MAX_PAYLOAD).unwrap() {
            assert!(matches!(message, Message::ConfigHeader(_)));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn alarm_follows_motion_only_above_nonzero_threshold() {
        let mut writer = typed_writer();
        assert!(!writer.write_motion(10, 0).unwrap());
        assert!(!writer.write_motion(10, 10).unwrap());
        assert!(writer.write_motion(11, 10).unwrap());
        assert_eq!(wire(writer), vec![2, 10, 2, 10, 2, 11, 3]);
    }

    #[test]
    fn resolution_only_in_typed_mode() {
        let mut plain = FrameWriter::new(Cursor::new(Vec::new()));
        plain.write_resolution(640, 480).unwrap();
        assert!(wire(plain).is_empty());

        let mut typed = typed_writer();
        typed.write_resolution(640, 480).unwrap();
        let mut bytes = BytesMut::from(wire(typed).as_slice());
        assert_eq!(
            decode_message(&mut bytes, DEFAULT_MAX_PAYLOAD).unwrap(),
            Some(Message::CurrentResolution {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn payload_over_limit_rejected_before_writing() {
        let config = FrameConfig {
            max_payload_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);
        let err = writer.write_frame(&[&[0u8; 6], &[0u8; 6]]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 12, max: 8 }));
        assert!(wire(writer).is_empty());
    }

    struct StalledWriter;

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct TimingOutWriter;

    impl Write for TimingOutWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::WouldBlock, "send timed out"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        out: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::new(ErrorKind::Interrupted, "signal"));
            }
            let n = buf.len().min(3);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_without_progress_is_fatal() {
        let mut writer = FrameWriter::new(StalledWriter);
        let err = writer.write_frame(&[b"abc"]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortWrite {
                written: 0,
                expected: 4
            }
        ));
    }

    #[test]
    fn send_timeout_is_fatal() {
        let mut writer = FrameWriter::new(TimingOutWriter);
        let err = writer.write_frame(&[b"abc"]).unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
    }

    #[test]
    fn interrupted_and_partial_writes_are_completed() {
        let sink = InterruptedOnce {
            interrupted: false,
            out: Vec::new(),
        };
        let mut writer = FrameWriter::with_config(sink, FrameConfig::with_policy(FramingPolicy::Raw));
        writer.write_frame(&[b"0123456789"]).unwrap();
        assert_eq!(writer.into_inner().out, b"0123456789");
    }
}
