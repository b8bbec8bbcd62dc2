//! # dialguard
//!
//! Deny-list guard for outbound connections.
//!
//! `dialguard` wraps the dial hooks of an HTTP client transport. Every
//! connection they open is inspected *after* name resolution, and refused if
//! its remote IP matches a deny-list entry (an IP literal or a CIDR range).
//! Because the check runs on the address actually connected to, a hostname
//! that resolves to an internal address is caught the same way a literal IP
//! is.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dialguard::{BaseTransport, Network, Transport};
//!
//! # async fn example() -> Result<(), dialguard::Error> {
//! let transport = Transport::new(
//!     BaseTransport::new(),
//!     ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "169.254.169.254", "::1"],
//! );
//!
//! let err = transport.dial(Network::Tcp, "169.254.169.254:80").await.err();
//! assert!(err.is_some_and(|e| e.is_denied()));
//! # Ok(())
//! # }
//! ```

mod conn;
mod denylist;
mod dial;
mod dialer;
mod error;
mod transport;

#[cfg(feature = "tls")]
mod tls;

pub use conn::{BoxConnection, Connection};
pub use denylist::{is_denied, DenyEntry, DenyList};
pub use dial::{DialContext, DialContextFn, DialFn, DialHook, Network};
pub use dialer::{SystemDialer, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Error, Result};
pub use transport::{BaseTransport, Transport, TransportBuilder};

#[cfg(feature = "tls")]
pub use tls::TlsDialer;

pub use tokio_util::sync::CancellationToken;
