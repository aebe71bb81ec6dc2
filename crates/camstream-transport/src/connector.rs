use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::{Endpoint, Protocol};
use crate::error::{Result, TransportError};
use crate::handle::{ConnectionHandle, Role};

/// Production retry bound: effectively "until connected or hard error".
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u64 = 10_000_000;

/// Retry and timeout policy for active connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// How long a single attempt waits for the socket to become writable.
    pub attempt_timeout: Duration,
    /// Pause after a refused or unreachable attempt.
    pub retry_delay: Duration,
    /// Total attempts before giving up with `ConnectRefused`.
    pub max_attempts: u64,
    /// Log every attempt at info level instead of debug.
    pub verbose: bool,
    /// Receive timeout applied once connected.
    pub recv_timeout: Option<Duration>,
    /// Send timeout applied once connected.
    pub send_timeout: Option<Duration>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(100),
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            verbose: false,
            recv_timeout: Some(Duration::from_secs(3)),
            send_timeout: Some(Duration::from_secs(3)),
        }
    }
}

/// Connect to `endpoint`, retrying while the remote side refuses.
///
/// TCP attempts use a non-blocking connect bounded by
/// [`ConnectConfig::attempt_timeout`]. Refused and unreachable attempts sleep
/// for [`ConnectConfig::retry_delay`] and retry; timed-out attempts retry at
/// once. Any other socket error aborts immediately with `ConnectFatal`.
///
/// UDP endpoints produce a connected datagram socket without retries.
pub fn connect(endpoint: &Endpoint, config: &ConnectConfig) -> Result<ConnectionHandle> {
    match endpoint.protocol {
        Protocol::Tcp => connect_tcp(endpoint.addr, config),
        Protocol::Udp => connect_udp(endpoint.addr, config),
    }
}

fn connect_tcp(addr: SocketAddr, config: &ConnectConfig) -> Result<ConnectionHandle> {
    let mut attempt = 0u64;
    while attempt < config.max_attempts {
        attempt += 1;
        if config.verbose {
            info!(%addr, attempt, "connecting");
        } else {
            debug!(%addr, attempt, "connecting");
        }

        match TcpStream::connect_timeout(&addr, config.attempt_timeout) {
            Ok(stream) => {
                stream
                    .set_nonblocking(false)
                    .map_err(|source| TransportError::ConnectFatal { addr, source })?;
                stream
                    .set_read_timeout(config.recv_timeout)
                    .map_err(|source| TransportError::ConnectFatal { addr, source })?;
                stream
                    .set_write_timeout(config.send_timeout)
                    .map_err(|source| TransportError::ConnectFatal { addr, source })?;
                info!(%addr, attempt, "connected");
                return Ok(ConnectionHandle::from_tcp(stream, Role::Connector, addr));
            }
            Err(err) if is_transient(&err) => {
                if config.verbose {
                    info!(%addr, attempt, error = %err, "connect attempt failed");
                }
                std::thread::sleep(config.retry_delay);
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                if config.verbose {
                    info!(%addr, attempt, "timeout connecting");
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(source) => return Err(TransportError::ConnectFatal { addr, source }),
        }
    }

    Err(TransportError::ConnectRefused {
        addr,
        attempts: attempt,
    })
}

fn connect_udp(addr: SocketAddr, config: &ConnectConfig) -> Result<ConnectionHandle> {
    let local = match addr.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket =
        UdpSocket::bind(local).map_err(|source| TransportError::ConnectFatal { addr, source })?;
    socket
        .connect(addr)
        .map_err(|source| TransportError::ConnectFatal { addr, source })?;
    socket
        .set_read_timeout(config.recv_timeout)
        .map_err(|source| TransportError::ConnectFatal { addr, source })?;
    socket
        .set_write_timeout(config.send_timeout)
        .map_err(|source| TransportError::ConnectFatal { addr, source })?;
    info!(%addr, "udp socket connected");
    Ok(ConnectionHandle::from_udp(socket, addr))
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable
    )
}
