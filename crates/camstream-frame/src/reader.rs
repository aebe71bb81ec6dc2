use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use camstream_transport::ConnectionHandle;

use crate::codec::{decode_length_prefixed, decode_message, FrameConfig, FramingPolicy, Message};
use crate::error::{FrameError, Result};
use crate::writer::{classify, transport_to_frame_error};

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads stream messages from any `Read` source.
///
/// Handles partial reads internally. With raw framing there are no message
/// boundaries, so each successful read is returned as one `RegularFrame`.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a reader with default configuration (length-prefixed).
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next message (blocking).
    ///
    /// Returns `Ok(None)` on a clean end of stream at a message boundary and
    /// `Err(FrameError::ConnectionClosed)` if the stream ends mid-message.
    /// Length-prefixed units are reported as `RegularFrame`.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.decode_buffered()? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(classify(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<Message>> {
        match self.config.policy {
            FramingPolicy::Raw => {
                if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Message::RegularFrame(self.buf.split().freeze())))
                }
            }
            FramingPolicy::LengthPrefixed => {
                Ok(decode_length_prefixed(&mut self.buf, self.config.max_payload_size)?
                    .map(Message::RegularFrame))
            }
            FramingPolicy::Typed => decode_message(&mut self.buf, self.config.max_payload_size),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_message().transpose()
    }
}

impl FrameReader<ConnectionHandle> {
    /// Create a reader for a connection and apply the read timeout from config.
    pub fn with_config_conn(inner: ConnectionHandle, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
