/// Errors that can occur while framing or reading stream messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A typed message carried a tag this reader does not know.
    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),

    /// The transport accepted no bytes for a pending write.
    #[error("short write ({written} of {expected} bytes sent)")]
    ShortWrite { written: usize, expected: usize },

    /// A send or receive did not complete within the transport timeout.
    #[error("transport timed out: {0}")]
    Timeout(std::io::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
