//! Connection handles produced by dial hooks.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// An established byte stream that knows who it is connected to.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {
    /// The remote address as `host:port` (IPv6 hosts bracketed).
    fn remote_addr(&self) -> io::Result<String>;
}

/// A boxed connection, the common currency of every dial hook.
pub type BoxConnection = Box<dyn Connection>;

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn remote_addr(&self) -> io::Result<String> {
        (**self).remote_addr()
    }
}

impl Connection for TcpStream {
    fn remote_addr(&self) -> io::Result<String> {
        self.peer_addr().map(|addr| addr.to_string())
    }
}

#[cfg(feature = "tls")]
impl<S: Connection> Connection for tokio_rustls::client::TlsStream<S> {
    fn remote_addr(&self) -> io::Result<String> {
        self.get_ref().0.remote_addr()
    }
}
