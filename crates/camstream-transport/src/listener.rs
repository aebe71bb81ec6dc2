use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::{Endpoint, Protocol};
use crate::error::{Result, TransportError};
use crate::handle::{ConnectionHandle, Role};

/// Timeouts applied to the accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Receive timeout on the accepted connection. Default: 3 s.
    pub recv_timeout: Option<Duration>,
    /// Send timeout on the accepted connection. Default: 3 s.
    pub send_timeout: Option<Duration>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Some(Duration::from_secs(3)),
            send_timeout: Some(Duration::from_secs(3)),
        }
    }
}

/// A bound, listening TCP socket waiting for its single consumer.
///
/// The socket is created with `SO_REUSEADDR` and a backlog of zero. It is
/// closed as soon as one connection has been accepted.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ListenConfig,
}

impl Listener {
    /// Bind and listen on `addr`.
    pub fn bind(addr: SocketAddr, config: ListenConfig) -> Result<Self> {
        let listener = bind_reuse(addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        info!(%local_addr, "waiting for a TCP connection");
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the single inbound connection (blocking), then stop listening.
    pub fn accept(self) -> Result<ConnectionHandle> {
        let (stream, peer) = loop {
            match self.listener.accept() {
                Ok(accepted) => break accepted,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::AcceptFailed(err)),
            }
        };
        drop(self.listener);

        stream
            .set_read_timeout(self.config.recv_timeout)
            .map_err(TransportError::AcceptFailed)?;
        stream
            .set_write_timeout(self.config.send_timeout)
            .map_err(TransportError::AcceptFailed)?;
        info!(%peer, "client connected");
        Ok(ConnectionHandle::from_tcp(stream, Role::Listener, peer))
    }
}

/// Bind, listen and accept one connection on `endpoint`.
pub fn listen(endpoint: &Endpoint, config: ListenConfig) -> Result<ConnectionHandle> {
    if endpoint.protocol == Protocol::Udp {
        return Err(TransportError::Unsupported("listening is only available for tcp"));
    }
    Listener::bind(endpoint.addr, config)?.accept()
}

#[cfg(unix)]
fn bind_reuse(addr: SocketAddr) -> Result<TcpListener> {
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    // SAFETY: plain socket(2) call; the returned descriptor is checked below.
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(TransportError::BindFailed {
            addr,
            source: std::io::Error::last_os_error(),
        });
    }
    // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: `fd` is valid for the lifetime of `socket`.
    unsafe {
        libc::fcntl(socket.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
    }

    let enable: libc::c_int = 1;
    // SAFETY: `enable` is a valid c_int and the length matches its size.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&enable as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        // Not fatal; bind reports any real conflict.
        debug!(%addr, error = %std::io::Error::last_os_error(), "SO_REUSEADDR not applied");
    }

    let (storage, len) = raw_socket_addr(&addr);
    // SAFETY: `storage` holds a properly initialized sockaddr of `len` bytes.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            (&storage as *const libc::sockaddr_storage).cast::<libc::sockaddr>(),
            len,
        )
    };
    if rc != 0 {
        return Err(TransportError::BindFailed {
            addr,
            source: std::io::Error::last_os_error(),
        });
    }

    loop {
        // SAFETY: `socket` is a bound stream socket.
        let rc = unsafe { libc::listen(socket.as_raw_fd(), 0) };
        if rc == 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(TransportError::ListenFailed { addr, source: err });
    }

    Ok(TcpListener::from(socket))
}

#[cfg(not(unix))]
fn bind_reuse(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).map_err(|source| TransportError::BindFailed { addr, source })
}

#[cfg(unix)]
fn raw_socket_addr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: an all-zero sockaddr_storage is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is sized and aligned for any sockaddr type.
            let sin = unsafe {
                &mut *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in>()
            };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: sockaddr_storage is sized and aligned for any sockaddr type.
            let sin6 = unsafe {
                &mut *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in6>()
            };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
