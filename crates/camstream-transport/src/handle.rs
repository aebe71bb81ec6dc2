use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use crate::endpoint::Protocol;
use crate::error::Result;

/// Largest payload sent in a single UDP datagram.
pub const MAX_DATAGRAM: usize = 65_507;

/// How the connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Connector,
}

/// A connected duplex byte channel implementing `Read` and `Write`.
///
/// Created once at startup and used for the lifetime of the stream. UDP
/// handles are connected datagram sockets; writes larger than
/// [`MAX_DATAGRAM`] are split across datagrams by the `Write` impl.
pub struct ConnectionHandle {
    inner: HandleInner,
    role: Role,
    peer: SocketAddr,
}

enum HandleInner {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Read for ConnectionHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HandleInner::Tcp(stream) => stream.read(buf),
            HandleInner::Udp(socket) => socket.recv(buf),
        }
    }
}

impl Write for ConnectionHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HandleInner::Tcp(stream) => stream.write(buf),
            HandleInner::Udp(socket) => socket.send(&buf[..buf.len().min(MAX_DATAGRAM)]),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            HandleInner::Tcp(stream) => stream.flush(),
            HandleInner::Udp(_) => Ok(()),
        }
    }
}

impl ConnectionHandle {
    pub(crate) fn from_tcp(stream: TcpStream, role: Role, peer: SocketAddr) -> Self {
        Self {
            inner: HandleInner::Tcp(stream),
            role,
            peer,
        }
    }

    pub(crate) fn from_udp(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            inner: HandleInner::Udp(socket),
            role: Role::Connector,
            peer,
        }
    }

    /// Whether this side listened or connected.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Address of the remote side.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn protocol(&self) -> Protocol {
        match self.inner {
            HandleInner::Tcp(_) => Protocol::Tcp,
            HandleInner::Udp(_) => Protocol::Udp,
        }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            HandleInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            HandleInner::Udp(socket) => socket.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            HandleInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            HandleInner::Udp(socket) => socket.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this handle (creates a new file descriptor).
    ///
    /// Used to give the control-command reader its own read half.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            HandleInner::Tcp(stream) => HandleInner::Tcp(stream.try_clone()?),
            HandleInner::Udp(socket) => HandleInner::Udp(socket.try_clone()?),
        };
        Ok(Self {
            inner,
            role: self.role,
            peer: self.peer,
        })
    }

    /// Shut down both directions of a TCP connection. No-op for UDP.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            HandleInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
            HandleInner::Udp(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("protocol", &self.protocol().scheme())
            .field("role", &self.role)
            .field("peer", &self.peer)
            .finish()
    }
}
