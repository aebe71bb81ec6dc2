//! Stream transport establishment.
//!
//! Opens the one connection a camera stream lives on:
//! - [`Listener`]: bind with address reuse, backlog zero, accept exactly one peer
//! - [`connect`]: active connect with bounded, transient-error-aware retries
//!
//! Both produce a [`ConnectionHandle`], the duplex byte channel everything
//! else builds on.

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod listener;

pub use connector::{connect, ConnectConfig, DEFAULT_MAX_CONNECT_ATTEMPTS};
pub use endpoint::{Endpoint, Protocol};
pub use error::{Result, TransportError};
pub use handle::{ConnectionHandle, Role, MAX_DATAGRAM};
pub use listener::{listen, ListenConfig, Listener};
