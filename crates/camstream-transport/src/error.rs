use std::net::SocketAddr;

/// Errors that can occur while establishing or using a stream connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create or bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The bound socket could not be put into listening state.
    #[error("failed to listen on {addr}: {source}")]
    ListenFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept the inbound connection.
    #[error("failed to accept connection: {0}")]
    AcceptFailed(std::io::Error),

    /// The remote endpoint kept refusing until the retry budget ran out.
    #[error("connection to {addr} refused after {attempts} attempts")]
    ConnectRefused { addr: SocketAddr, attempts: u64 },

    /// An unrecoverable error occurred while connecting.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFatal {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint {input:?}: {reason}")]
    InvalidEndpoint { input: String, reason: String },

    /// The requested mode is not available for this protocol.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// An I/O error occurred on the established connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
